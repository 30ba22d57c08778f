//! Source loading
//!
//! [SourceLoader] reads every source through a [SourceReader], checks it against a [Schema],
//! coerces cells to typed [Value]s and merges all rows into one [Dataset].

use crate::error::LoadError;
use crate::fingerprint::Fingerprint;
use crate::source::{Row, SourceInfo, SourceReader};
use crate::types::{timestamp, Column, ColumnKind, Dataset, Record, Value};

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{event, Level};

/// Expected column of the sources
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    /// Whether every non-empty source must provide the column
    #[serde(default)]
    pub required: bool,
}

impl ColumnSpec {
    fn new(name: &str, kind: ColumnKind, required: bool) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required,
        }
    }
}

/// Ordered set of expected source columns
///
/// Columns outside the schema are ignored when loading.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Schema {
    pub columns: Vec<ColumnSpec>,
}

impl Schema {
    /// Schema of the detailed cycle records.
    pub fn cycle() -> Self {
        let text = |name| ColumnSpec::new(name, ColumnKind::String, false);
        Self {
            columns: vec![
                ColumnSpec::new("DataHoraInicio", ColumnKind::Timestamp, true),
                text("Tipo Input"),
                ColumnSpec::new("Massa", ColumnKind::Number, false),
                text("Tipo de atividade"),
                text("Especificacao de material"),
                text("Material"),
                text("Tag carga"),
                text("Frota carga"),
                text("Frota transporte"),
            ],
        }
    }

    /// Read a schema from a JSON file of the form `{"columns": [{"name", "kind", "required"}]}`.
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let contents = fs::read_to_string(path).map_err(|error| LoadError::Read {
            source_id: path.display().to_string(),
            error,
        })?;
        serde_json::from_str(&contents).map_err(|error| LoadError::InvalidSchema {
            path: path.display().to_string(),
            error,
        })
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::cycle()
    }
}

/// A cell that holds something other than null but cannot be coerced to the column kind.
struct InvalidCell;

/// Loads and merges sources into a [Dataset].
///
/// Stateless apart from its configuration.
pub struct SourceLoader {
    reader: Arc<dyn SourceReader>,
    schema: Schema,
    null_markers: Vec<String>,
}

impl SourceLoader {
    /// Return a new SourceLoader with the default null marker `-`.
    pub fn new(reader: Arc<dyn SourceReader>, schema: Schema) -> Self {
        Self {
            reader,
            schema,
            null_markers: vec!["-".to_string()],
        }
    }

    /// Replace the text values treated as null in addition to blank strings.
    pub fn with_null_markers(mut self, null_markers: Vec<String>) -> Self {
        self.null_markers = null_markers
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        self
    }

    /// Compute the fingerprint of the sources as they are now.
    pub fn fingerprint(&self) -> Result<Fingerprint, LoadError> {
        Ok(Fingerprint::new(self.reader.discover()?))
    }

    /// Read and merge the given sources.
    ///
    /// Sources are merged in ascending identity order. A schema column is part of the dataset if
    /// at least one source provides it; rows from sources without it hold null.
    #[tracing::instrument(level = "DEBUG", skip_all, fields(sources = sources.len()))]
    pub fn load(&self, sources: &[SourceInfo]) -> Result<Dataset, LoadError> {
        if sources.is_empty() {
            return Err(LoadError::NoSources {
                location: self.reader.location(),
            });
        }
        let mut sources: Vec<&SourceInfo> = sources.iter().collect();
        sources.sort_by(|a, b| a.id.cmp(&b.id));

        let mut tables = Vec::with_capacity(sources.len());
        for source in sources {
            let rows = self.reader.read(source)?;
            self.check_required(source, &rows)?;
            tables.push((source, rows));
        }

        let present: Vec<&ColumnSpec> = self
            .schema
            .columns
            .iter()
            .filter(|spec| {
                tables
                    .iter()
                    .any(|(_, rows)| rows.iter().any(|row| row.contains_key(&spec.name)))
            })
            .collect();
        let columns: Vec<Column> = present
            .iter()
            .map(|spec| Column::new(spec.name.as_str(), spec.kind))
            .collect();

        let mut records = Vec::with_capacity(tables.iter().map(|(_, rows)| rows.len()).sum());
        for (source, rows) in &tables {
            let mut invalid = 0;
            for row in rows {
                let values = present
                    .iter()
                    .map(|spec| match row.get(&spec.name) {
                        None => None,
                        Some(raw) => self.coerce(raw, spec.kind).unwrap_or_else(|InvalidCell| {
                            invalid += 1;
                            None
                        }),
                    })
                    .collect();
                records.push(Record::new(values));
            }
            if invalid > 0 {
                event!(
                    Level::WARN,
                    source = %source.id,
                    cells = invalid,
                    "values could not be coerced to their column kind and were set to null"
                );
            }
            event!(Level::DEBUG, source = %source.id, rows = rows.len(), "loaded source");
        }

        Ok(Dataset::new(columns, records))
    }

    /// Check that a source provides every required column.
    ///
    /// A source without rows contributes nothing and is not checked.
    fn check_required(&self, source: &SourceInfo, rows: &[Row]) -> Result<(), LoadError> {
        if rows.is_empty() {
            return Ok(());
        }
        let missing: Vec<String> = self
            .schema
            .columns
            .iter()
            .filter(|spec| spec.required)
            .filter(|spec| !rows.iter().any(|row| row.contains_key(&spec.name)))
            .map(|spec| spec.name.clone())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(LoadError::MissingColumns {
                source_id: source.id.clone(),
                columns: missing,
            })
        }
    }

    fn is_null_text(&self, text: &str) -> bool {
        text.is_empty() || self.null_markers.iter().any(|m| m == text)
    }

    /// Coerce a raw cell to the kind of its column.
    fn coerce(
        &self,
        raw: &serde_json::Value,
        kind: ColumnKind,
    ) -> Result<Option<Value>, InvalidCell> {
        use serde_json::Value as Json;

        if let Json::String(text) = raw {
            if self.is_null_text(text.trim()) {
                return Ok(None);
            }
        }
        match (kind, raw) {
            (_, Json::Null) => Ok(None),
            (ColumnKind::String, Json::String(text)) => {
                Ok(Some(Value::Str(text.trim().to_string())))
            }
            (ColumnKind::String, Json::Number(number)) => number
                .as_f64()
                .map(|n| Some(Value::Str(Value::Num(n).key().into_owned())))
                .ok_or(InvalidCell),
            (ColumnKind::String, Json::Bool(flag)) => Ok(Some(Value::Str(flag.to_string()))),
            (ColumnKind::Number, Json::Number(number)) => finite(number.as_f64()),
            (ColumnKind::Number, Json::String(text)) => finite(text.trim().parse::<f64>().ok()),
            (ColumnKind::Timestamp, Json::String(text)) => timestamp::parse_date_time(text)
                .map(|ts| Some(Value::Timestamp(ts)))
                .ok_or(InvalidCell),
            (ColumnKind::Timestamp, Json::Number(number)) => number
                .as_f64()
                .and_then(timestamp::from_unix_seconds)
                .map(|ts| Some(Value::Timestamp(ts)))
                .ok_or(InvalidCell),
            _ => Err(InvalidCell),
        }
    }
}

fn finite(number: Option<f64>) -> Result<Option<Value>, InvalidCell> {
    match number {
        Some(n) if n.is_finite() => Ok(Some(Value::Num(n))),
        _ => Err(InvalidCell),
    }
}
