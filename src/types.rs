pub mod dataset;
pub mod timestamp;
pub mod value;

// Re-export types for convenience.
pub use crate::types::dataset::{Column, Dataset, Record};
pub use crate::types::timestamp::DateBound;
pub use crate::types::value::{ColumnKind, Value};
