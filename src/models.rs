//! Data types and associated functions and methods

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use validator::{Validate, ValidationError};

use crate::error::Warning;
use crate::types::DateBound;

/// Default label of the synthetic group absorbing everything outside the top N.
pub const REMAINDER_LABEL: &str = "Outros";

/// Label of the group collecting rows whose grouping value is null.
pub const UNSPECIFIED_LABEL: &str = "unspecified";

/// Supported aggregation modes
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AggregationMode {
    /// Number of rows per group
    Count,
    /// Sum of the measure per group
    Sum,
    /// Sum of the measure for the N largest groups, the rest folded into a remainder group
    TopN,
    /// Sum of the measure divided by the number of rows per group
    Ratio,
}

impl AggregationMode {
    /// Returns true if the mode reads a measure column.
    pub fn requires_measure(self) -> bool {
        !matches!(self, Self::Count)
    }
}

/// Calendar granularity of a period sub-grouping
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Granularity {
    /// `YYYY-MM`
    #[default]
    Month,
    /// `YYYY-MM-DD`
    Day,
}

/// Splits every group by the calendar period of a timestamp column
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PeriodGrouping {
    /// Timestamp column providing the period
    #[validate(length(min = 1, message = "period column must not be empty"))]
    pub column: String,
    /// Calendar granularity
    #[serde(default)]
    pub granularity: Granularity,
}

/// Inclusive date range over a timestamp column
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_date_range"))]
pub struct DateRange {
    /// Timestamp column to constrain
    #[validate(length(min = 1, message = "date range column must not be empty"))]
    pub column: String,
    /// Earliest admitted timestamp
    pub start: Option<DateBound>,
    /// Latest admitted timestamp. A bare date stands for midnight at the start of that day.
    pub end: Option<DateBound>,
}

impl DateRange {
    /// Returns true if neither bound is set.
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Per-column value-set filters plus an optional date range
///
/// A column that is absent, null, or mapped to an empty set is not constrained.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct FilterSpec {
    /// Allowed values per column
    #[serde(default)]
    pub columns: BTreeMap<String, Option<BTreeSet<String>>>,
    /// Optional date range
    #[serde(default)]
    #[validate]
    pub date_range: Option<DateRange>,
}

impl FilterSpec {
    /// Return an empty FilterSpec, which passes every row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Constrain `column` to the given values.
    pub fn with_values<I, S>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.columns.insert(column.to_string(), Some(values));
        self
    }

    /// Constrain a timestamp column to a date range.
    pub fn with_date_range(mut self, date_range: DateRange) -> Self {
        self.date_range = Some(date_range);
        self
    }

    /// Iterate over the value-set constraints that actually restrict rows.
    pub fn active_constraints(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.columns.iter().filter_map(|(column, values)| match values {
            Some(values) if !values.is_empty() => Some((column.as_str(), values)),
            _ => None,
        })
    }

    /// Returns true if the filter admits every row.
    pub fn is_pass_through(&self) -> bool {
        self.active_constraints().next().is_none()
            && self
                .date_range
                .as_ref()
                .map_or(true, DateRange::is_unbounded)
    }
}

/// Aggregation request
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_aggregation_request"))]
pub struct AggregationRequest {
    /// Column whose values form the groups
    #[validate(length(min = 1, message = "group_by must not be empty"))]
    pub group_by: String,
    /// Numeric column summed by sum, top_n and ratio
    pub measure: Option<String>,
    /// Aggregation mode
    pub mode: AggregationMode,
    /// Number of groups kept by top_n
    #[validate(range(min = 1, message = "limit must be greater than 0"))]
    pub limit: Option<usize>,
    /// Label of the top_n remainder group
    #[validate(length(min = 1, message = "remainder_label must not be empty"))]
    pub remainder_label: Option<String>,
    /// Optional period sub-grouping
    #[validate]
    pub period: Option<PeriodGrouping>,
}

impl AggregationRequest {
    /// Return a new AggregationRequest with only required fields set.
    pub fn new(group_by: &str, mode: AggregationMode) -> Self {
        Self {
            group_by: group_by.to_string(),
            measure: None,
            mode,
            limit: None,
            remainder_label: None,
            period: None,
        }
    }

    pub fn with_measure(mut self, measure: &str) -> Self {
        self.measure = Some(measure.to_string());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_remainder_label(mut self, label: &str) -> Self {
        self.remainder_label = Some(label.to_string());
        self
    }

    pub fn with_period(mut self, column: &str, granularity: Granularity) -> Self {
        self.period = Some(PeriodGrouping {
            column: column.to_string(),
            granularity,
        });
        self
    }

    /// Label of the remainder group, falling back to [REMAINDER_LABEL].
    pub fn remainder_label(&self) -> &str {
        self.remainder_label.as_deref().unwrap_or(REMAINDER_LABEL)
    }
}

/// Body of a query request
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct QueryRequest {
    /// Row filters
    #[serde(default)]
    #[validate]
    pub filters: FilterSpec,
    /// Aggregation to apply to the filtered rows
    #[validate]
    pub aggregation: AggregationRequest,
}

/// Validate that a date range is not inverted
fn validate_date_range(date_range: &DateRange) -> Result<(), ValidationError> {
    if let (Some(start), Some(end)) = (date_range.start, date_range.end) {
        if !end.admits_until(start.earliest()) {
            let mut error = ValidationError::new("date range start must not be after end");
            error.add_param("start".into(), &start.to_string());
            error.add_param("end".into(), &end.to_string());
            return Err(error);
        }
    }
    Ok(())
}

/// Validate combinations of fields in an AggregationRequest
fn validate_aggregation_request(request: &AggregationRequest) -> Result<(), ValidationError> {
    if request.mode.requires_measure() && request.measure.is_none() {
        let mut error = ValidationError::new("Aggregation mode requires a measure column");
        error.add_param("mode".into(), &request.mode.to_string());
        return Err(error);
    }
    if request.mode == AggregationMode::TopN && request.limit.is_none() {
        return Err(ValidationError::new("top_n aggregation requires a limit"));
    }
    Ok(())
}

/// One row of an aggregation result
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResultRow {
    /// Group key
    pub group: String,
    /// Period key, present when a period sub-grouping was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    /// Metric value
    pub value: f64,
    /// Number of filtered rows summarised by this result row
    pub rows: usize,
}

impl ResultRow {
    /// Return a ResultRow, with a period key if the rows were sub-grouped by period.
    pub fn new(group: &str, period: Option<&str>, value: f64, rows: usize) -> Self {
        Self {
            group: group.to_string(),
            period: period.map(str::to_string),
            value,
            rows,
        }
    }
}

/// How the dataset for a query was obtained from the cache
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CacheOutcome {
    /// The cached dataset matched the live fingerprint
    Hit,
    /// This call reloaded the dataset
    Miss,
    /// This call waited for a reload started by another call
    Coalesced,
    /// Reloading failed and the previous dataset was served
    Stale,
}

/// Metadata describing how a query result was produced
#[derive(Clone, Debug, Serialize)]
pub struct QueryMetadata {
    /// Unique identifier of the query
    pub query_id: String,
    /// Rows in the dataset
    pub total_rows: usize,
    /// Rows left after filtering
    pub matched_rows: usize,
    /// Number of result rows
    pub groups: usize,
    /// Cache outcome
    pub cache: CacheOutcome,
    /// Generation of the dataset used
    pub generation: u64,
    /// Fingerprint digest of the dataset used
    pub fingerprint: String,
    /// Wall-clock time spent answering the query
    pub elapsed_ms: f64,
    /// Recoverable conditions met while answering
    pub warnings: Vec<Warning>,
}

/// Response containing the result of a query and associated metadata
#[derive(Clone, Debug, Serialize)]
pub struct QueryResult {
    /// Ordered result rows
    pub rows: Vec<ResultRow>,
    /// Metadata
    pub metadata: QueryMetadata,
}

/// Distinct values of a column, used to populate filter options
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DistinctValues {
    pub column: String,
    /// Sorted ascending, no duplicates, no nulls
    pub values: Vec<String>,
    pub warnings: Vec<Warning>,
}

/// State of the dataset cache
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CacheStatus {
    /// Whether a dataset is cached
    pub cached: bool,
    /// Fingerprint digest of the cached dataset
    pub fingerprint: Option<String>,
    /// RFC 3339 time at which the cached dataset was installed
    pub loaded_at: Option<String>,
    /// Rows in the cached dataset
    pub row_count: usize,
    /// Sources merged into the cached dataset
    pub source_count: usize,
    /// Generation of the cached dataset
    pub generation: Option<u64>,
    /// Time spent loading the cached dataset
    pub load_ms: Option<f64>,
    /// Fingerprint digest of the sources as they are now, if they could be listed
    pub live_fingerprint: Option<String>,
    /// Whether the cached dataset matches the sources as they are now
    pub valid: bool,
}

/// Outcome of an explicit cache invalidation
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InvalidateReport {
    /// Whether a dataset was cached before the invalidation
    pub had_dataset: bool,
    /// RFC 3339 time of the invalidation
    pub invalidated_at: String,
}
