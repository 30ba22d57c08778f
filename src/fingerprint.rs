//! Freshness fingerprint of a set of sources
//!
//! A fingerprint is computed from source metadata only, so checking whether the dataset is
//! current never reads file contents.

use crate::source::SourceInfo;

use time::OffsetDateTime;

/// Signature of the source set at one point in time
///
/// Two fingerprints are equal iff they list the same sources with the same modification time
/// and size, in any order.
#[derive(Clone, Debug)]
pub struct Fingerprint {
    /// Sorted by identity
    sources: Vec<SourceInfo>,
    digest: String,
}

impl Fingerprint {
    /// Return a new Fingerprint for a set of sources.
    pub fn new(mut sources: Vec<SourceInfo>) -> Self {
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        let digest = digest(&sources);
        Self { sources, digest }
    }

    /// Sources covered by the fingerprint, sorted by identity.
    pub fn sources(&self) -> &[SourceInfo] {
        &self.sources
    }

    /// Hex encoded md5 digest of the sorted (identity, modification time, size) tuples.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.sources == other.sources
    }
}

impl Eq for Fingerprint {}

fn digest(sources: &[SourceInfo]) -> String {
    let mut context = md5::Context::new();
    for source in sources {
        let modified = OffsetDateTime::from(source.modified).unix_timestamp_nanos();
        context.consume(format!("{}\t{}\t{}\n", source.id, modified, source.size));
    }
    format!("{:x}", context.compute())
}
