//! Timestamp parsing and formatting
//!
//! Source files and requests carry timestamps as text. We accept the following forms:
//!
//! * `YYYY-MM-DD`
//! * `YYYY-MM-DDTHH:MM` or `YYYY-MM-DD HH:MM`
//! * `YYYY-MM-DDTHH:MM:SS` or `YYYY-MM-DD HH:MM:SS`
//! * any of the above with seconds followed by a fractional part
//!
//! Timestamps are naive: no time zone is attached or assumed.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

const DATE: &[FormatItem<'_>] = format_description!("[year]-[month]-[day]");
const MONTH: &[FormatItem<'_>] = format_description!("[year]-[month]");
const CANONICAL: &[FormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

const DATE_TIME_FORMATS: [&[FormatItem<'_>]; 6] = [
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]"),
];

/// Parse a date without a time component.
pub fn parse_date(text: &str) -> Option<Date> {
    Date::parse(text.trim(), DATE).ok()
}

/// Parse a date and time. A date without a time component is taken as midnight.
pub fn parse_date_time(text: &str) -> Option<PrimitiveDateTime> {
    let text = text.trim();
    DATE_TIME_FORMATS
        .iter()
        .find_map(|format| PrimitiveDateTime::parse(text, *format).ok())
        .or_else(|| parse_date(text).map(|date| date.midnight()))
}

/// Convert seconds since the Unix epoch into a UTC date and time.
pub fn from_unix_seconds(seconds: f64) -> Option<PrimitiveDateTime> {
    if !seconds.is_finite() {
        return None;
    }
    let utc = OffsetDateTime::from_unix_timestamp(seconds.trunc() as i64).ok()?;
    Some(PrimitiveDateTime::new(utc.date(), utc.time()))
}

/// Format a timestamp as `YYYY-MM-DDTHH:MM:SS`.
pub fn format(timestamp: PrimitiveDateTime) -> String {
    timestamp
        .format(CANONICAL)
        .unwrap_or_else(|_| timestamp.to_string())
}

/// Format the calendar month of a timestamp as `YYYY-MM`.
pub fn format_month(timestamp: PrimitiveDateTime) -> String {
    timestamp
        .format(MONTH)
        .unwrap_or_else(|_| timestamp.date().to_string())
}

/// Format the calendar day of a timestamp as `YYYY-MM-DD`.
pub fn format_day(timestamp: PrimitiveDateTime) -> String {
    timestamp
        .format(DATE)
        .unwrap_or_else(|_| timestamp.date().to_string())
}

/// One end of a date range filter.
///
/// A bound given as a bare date stands for midnight at the start of that day, at either end of
/// the range, so `end = 2024-01-31` excludes cycles that started later that day.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DateBound {
    Date(Date),
    DateTime(PrimitiveDateTime),
}

impl DateBound {
    /// Parse a bound from any of the accepted text forms.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(date) = parse_date(text) {
            return Some(Self::Date(date));
        }
        DATE_TIME_FORMATS
            .iter()
            .find_map(|format| PrimitiveDateTime::parse(text, *format).ok())
            .map(Self::DateTime)
    }

    /// Returns the earliest instant covered by this bound.
    pub fn earliest(self) -> PrimitiveDateTime {
        match self {
            Self::Date(date) => date.with_time(Time::MIDNIGHT),
            Self::DateTime(timestamp) => timestamp,
        }
    }

    /// Returns true if `timestamp` is at or after this bound.
    pub fn admits_from(self, timestamp: PrimitiveDateTime) -> bool {
        timestamp >= self.earliest()
    }

    /// Returns true if `timestamp` is at or before this bound.
    pub fn admits_until(self, timestamp: PrimitiveDateTime) -> bool {
        timestamp <= self.earliest()
    }
}

impl fmt::Display for DateBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(date) => f.write_str(&format_day(date.midnight())),
            Self::DateTime(timestamp) => f.write_str(&format(*timestamp)),
        }
    }
}

impl Serialize for DateBound {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DateBound {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        DateBound::parse(&text).ok_or_else(|| {
            de::Error::custom(format!(
                "invalid date `{}`, expected YYYY-MM-DD or YYYY-MM-DDTHH:MM[:SS]",
                text
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use time::macros::{date, datetime};

    #[test]
    fn parse_all_forms() {
        assert_eq!(
            Some(datetime!(2024-01-02 00:00)),
            parse_date_time("2024-01-02")
        );
        assert_eq!(
            Some(datetime!(2024-01-02 03:04)),
            parse_date_time("2024-01-02T03:04")
        );
        assert_eq!(
            Some(datetime!(2024-01-02 03:04:05)),
            parse_date_time("2024-01-02 03:04:05")
        );
        assert_eq!(
            Some(datetime!(2024-01-02 03:04:05.5)),
            parse_date_time(" 2024-01-02T03:04:05.500 ")
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(None, parse_date_time("02/01/2024"));
        assert_eq!(None, parse_date_time(""));
        assert_eq!(None, parse_date("2024-13-01"));
    }

    #[test]
    fn unix_seconds() {
        assert_eq!(Some(datetime!(1970-01-02 00:00)), from_unix_seconds(86400.0));
        assert_eq!(None, from_unix_seconds(f64::NAN));
    }

    #[test]
    fn periods() {
        let ts = datetime!(2023-11-09 17:45:00);
        assert_eq!("2023-11", format_month(ts));
        assert_eq!("2023-11-09", format_day(ts));
        assert_eq!("2023-11-09T17:45:00", format(ts));
    }

    #[test]
    fn date_bound_is_midnight() {
        let end = DateBound::parse("2024-01-31").unwrap();
        assert_eq!(DateBound::Date(date!(2024 - 01 - 31)), end);
        assert!(end.admits_until(datetime!(2024-01-31 00:00)));
        assert!(end.admits_until(datetime!(2024-01-30 23:59:59)));
        assert!(!end.admits_until(datetime!(2024-01-31 00:00:01)));
        assert!(!end.admits_until(datetime!(2024-01-31 23:15)));
        assert!(end.admits_from(datetime!(2024-01-31 00:00)));
        assert!(!end.admits_from(datetime!(2024-01-30 23:59:59)));
    }

    #[test]
    fn date_time_bound_is_exact() {
        let bound = DateBound::parse("2024-01-31T12:00").unwrap();
        assert!(bound.admits_until(datetime!(2024-01-31 12:00)));
        assert!(!bound.admits_until(datetime!(2024-01-31 12:00:01)));
        assert!(bound.admits_from(datetime!(2024-01-31 12:00)));
        assert!(!bound.admits_from(datetime!(2024-01-31 11:59:59)));
    }

    #[test]
    fn date_bound_serde() {
        let bound: DateBound = serde_json::from_str("\"2024-05-06\"").unwrap();
        assert_eq!("\"2024-05-06\"", serde_json::to_string(&bound).unwrap());
        let error = serde_json::from_str::<DateBound>("\"yesterday\"").unwrap_err();
        assert!(error.to_string().contains("invalid date `yesterday`"));
    }
}
