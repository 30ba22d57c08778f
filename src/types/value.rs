//! Typed scalar values held in a [Dataset](crate::types::Dataset).
//!
//! A cell is either null (represented by `Option::None` at the record level) or one of the
//! [Value] variants. Filtering, grouping and distinct listing all compare values through their
//! canonical string key, so a filter value of `"7"` matches the number `7.0`.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use time::PrimitiveDateTime;

use crate::types::timestamp;

/// Kind of the values stored in a column
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ColumnKind {
    /// Free text
    String,
    /// [f64]
    Number,
    /// Naive date and time
    Timestamp,
}

/// A non-null cell value
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Str(String),
    Num(f64),
    Timestamp(PrimitiveDateTime),
}

impl Value {
    /// Returns the numeric value, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the timestamp, if this is a timestamp.
    pub fn as_timestamp(&self) -> Option<PrimitiveDateTime> {
        match self {
            Self::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// Returns the canonical key of the value.
    ///
    /// Strings are borrowed as-is. Numbers use the shortest round-trip representation, so
    /// integral values have no fractional part. Timestamps use `YYYY-MM-DDTHH:MM:SS`.
    pub fn key(&self) -> Cow<'_, str> {
        match self {
            Self::Str(s) => Cow::Borrowed(s.as_str()),
            other => Cow::Owned(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Num(n) => write!(f, "{}", n),
            Self::Timestamp(ts) => f.write_str(&timestamp::format(*ts)),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Num(value)
    }
}

impl From<PrimitiveDateTime> for Value {
    fn from(value: PrimitiveDateTime) -> Self {
        Self::Timestamp(value)
    }
}
