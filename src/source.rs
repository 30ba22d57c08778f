//! Source discovery and decoding
//!
//! The cache only sees sources through the [SourceReader] trait. [JsonLinesReader] implements it
//! for a directory of JSON Lines files, one JSON object per line with column names as keys.

use crate::error::LoadError;

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// One decoded source row, keyed by column name
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Prefix of the lock files office suites leave next to open documents.
const LOCK_FILE_PREFIX: &str = "~$";

/// Identity and modification metadata of a source
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SourceInfo {
    /// Identifier, unique among the sources of a reader
    pub id: String,
    /// Last modification time
    pub modified: SystemTime,
    /// Size in bytes
    pub size: u64,
}

/// Trait for source readers.
///
/// This forms the contract between the cache and the storage holding the source files.
/// Implementations block, and are called from the blocking thread pool.
pub trait SourceReader: Send + Sync {
    /// Human readable location of the sources, used in error messages.
    fn location(&self) -> String;

    /// List the sources that currently exist.
    ///
    /// Must not read source contents.
    fn discover(&self) -> Result<Vec<SourceInfo>, LoadError>;

    /// Decode every row of a source.
    ///
    /// # Arguments
    ///
    /// * `source`: A source previously returned by [SourceReader::discover]
    fn read(&self, source: &SourceInfo) -> Result<Vec<Row>, LoadError>;
}

/// Reads JSON Lines files from a directory.
///
/// Implements [SourceReader] for the local file system.
#[derive(Clone, Debug)]
pub struct JsonLinesReader {
    directory: PathBuf,
    extension: String,
}

impl JsonLinesReader {
    /// Return a new JsonLinesReader.
    ///
    /// # Arguments
    ///
    /// * `directory`: Directory holding the sources. Subdirectories are not searched.
    /// * `extension`: Extension of source files, without the leading dot
    pub fn new(directory: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            directory: directory.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    fn is_source(&self, path: &Path) -> bool {
        let has_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case(&self.extension));
        let is_lock_file = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with(LOCK_FILE_PREFIX));
        has_extension && !is_lock_file
    }
}

impl SourceReader for JsonLinesReader {
    fn location(&self) -> String {
        self.directory.display().to_string()
    }

    #[tracing::instrument(level = "DEBUG", skip(self), fields(directory = %self.directory.display()))]
    fn discover(&self) -> Result<Vec<SourceInfo>, LoadError> {
        let discover_error = |error| LoadError::Discover {
            location: self.location(),
            error,
        };
        let mut sources = Vec::new();
        for entry in fs::read_dir(&self.directory).map_err(discover_error)? {
            let entry = entry.map_err(discover_error)?;
            let path = entry.path();
            if !self.is_source(&path) {
                continue;
            }
            let metadata = fs::metadata(&path).map_err(discover_error)?;
            if !metadata.is_file() {
                continue;
            }
            sources.push(SourceInfo {
                id: entry.file_name().to_string_lossy().into_owned(),
                modified: metadata.modified().map_err(discover_error)?,
                size: metadata.len(),
            });
        }
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sources)
    }

    #[tracing::instrument(level = "DEBUG", skip(self, source), fields(source = %source.id))]
    fn read(&self, source: &SourceInfo) -> Result<Vec<Row>, LoadError> {
        let read_error = |error| LoadError::Read {
            source_id: source.id.clone(),
            error,
        };
        let file = File::open(self.directory.join(&source.id)).map_err(read_error)?;
        let mut rows = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(read_error)?;
            // Editors on Windows like to start files with a byte order mark.
            let line = line.trim_start_matches('\u{feff}').trim();
            if line.is_empty() {
                continue;
            }
            let value: serde_json::Value =
                serde_json::from_str(line).map_err(|error| LoadError::Decode {
                    source_id: source.id.clone(),
                    line: index + 1,
                    error,
                })?;
            match value {
                serde_json::Value::Object(row) => rows.push(row),
                _ => {
                    return Err(LoadError::NotAnObject {
                        source_id: source.id.clone(),
                        line: index + 1,
                    })
                }
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut file = File::create(dir.join(name)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "b.jsonl", "{}\n");
        write_file(dir.path(), "a.JSONL", "{}\n");
        write_file(dir.path(), "~$a.jsonl", "locked");
        write_file(dir.path(), "notes.txt", "ignored");
        fs::create_dir(dir.path().join("nested.jsonl")).unwrap();

        let reader = JsonLinesReader::new(dir.path(), ".jsonl");
        let sources = reader.discover().unwrap();
        let ids: Vec<_> = sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(vec!["a.JSONL", "b.jsonl"], ids);
        assert_eq!(3, sources[1].size);
    }

    #[test]
    fn discover_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let reader = JsonLinesReader::new(dir.path().join("absent"), "jsonl");
        let error = reader.discover().unwrap_err();
        assert!(matches!(error, LoadError::Discover { .. }), "{error:?}");
    }

    #[test]
    fn read_rows() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "cycles.jsonl",
            "\u{feff}{\"Material\": \"Minerio\", \"Massa\": 12.5}\n\n  \n{\"Material\": null}\n",
        );
        let reader = JsonLinesReader::new(dir.path(), "jsonl");
        let sources = reader.discover().unwrap();
        let rows = reader.read(&sources[0]).unwrap();
        assert_eq!(2, rows.len());
        assert_eq!(Some(&serde_json::json!("Minerio")), rows[0].get("Material"));
        assert_eq!(Some(&serde_json::Value::Null), rows[1].get("Material"));
    }

    #[test]
    fn read_rejects_non_object_line() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "cycles.jsonl", "{\"Massa\": 1}\n[1, 2]\n");
        let reader = JsonLinesReader::new(dir.path(), "jsonl");
        let sources = reader.discover().unwrap();
        let error = reader.read(&sources[0]).unwrap_err();
        assert_eq!(
            "source cycles.jsonl line 2 is not a JSON object",
            error.to_string()
        );
    }

    #[test]
    fn read_rejects_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "cycles.jsonl", "{\"Massa\": \n");
        let reader = JsonLinesReader::new(dir.path(), "jsonl");
        let sources = reader.discover().unwrap();
        let error = reader.read(&sources[0]).unwrap_err();
        assert!(
            matches!(error, LoadError::Decode { line: 1, .. }),
            "{error:?}"
        );
    }

    #[test]
    fn read_removed_file() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "cycles.jsonl", "{}\n");
        let reader = JsonLinesReader::new(dir.path(), "jsonl");
        let sources = reader.discover().unwrap();
        fs::remove_file(dir.path().join("cycles.jsonl")).unwrap();
        let error = reader.read(&sources[0]).unwrap_err();
        assert!(matches!(error, LoadError::Read { .. }), "{error:?}");
    }
}
