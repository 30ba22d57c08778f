//! Error handling.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use axum::{
    extract::rejection::JsonRejection,
    http::header,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use thiserror::Error;
use tracing::{event, Level};

use crate::models::AggregationMode;
use crate::types::ColumnKind;

/// Failure to produce a dataset from the sources
///
/// Recoverable when a previous dataset is cached: the cache serves the stale dataset and the
/// failure becomes a [Warning::StaleData]. Fatal to the call otherwise.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No source files could be found
    #[error("no source files found in {location}")]
    NoSources { location: String },

    /// Listing the sources failed
    #[error("failed to list sources in {location}")]
    Discover {
        location: String,
        #[source]
        error: std::io::Error,
    },

    /// Reading a source failed
    #[error("failed to read source {source_id}")]
    Read {
        source_id: String,
        #[source]
        error: std::io::Error,
    },

    /// A line of a source could not be decoded
    #[error("failed to decode source {source_id} at line {line}")]
    Decode {
        source_id: String,
        line: usize,
        #[source]
        error: serde_json::Error,
    },

    /// A line of a source decoded to something other than an object
    #[error("source {source_id} line {line} is not a JSON object")]
    NotAnObject { source_id: String, line: usize },

    /// A source lacks columns required by the schema
    #[error("source {source_id} is missing required columns: {}", .columns.join(", "))]
    MissingColumns {
        source_id: String,
        columns: Vec<String>,
    },

    /// The schema file could not be parsed
    #[error("invalid schema file {path}")]
    InvalidSchema {
        path: String,
        #[source]
        error: serde_json::Error,
    },

    /// The reload task ended without reporting a result
    #[error("reload task ended unexpectedly")]
    Interrupted,
}

/// Role a column plays in an aggregation request
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum ColumnRole {
    Grouping,
    Measure,
    Period,
}

/// An aggregation request that cannot be answered against the dataset
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The request names a column that is not present in the dataset
    #[error("{role} column `{column}` not found in the dataset")]
    UnknownColumn { column: String, role: ColumnRole },

    /// The mode needs a measure column but none was given
    #[error("{mode} aggregation requires a measure column")]
    MissingMeasure { mode: AggregationMode },

    /// The measure column does not hold numbers
    #[error("measure column `{column}` must be numeric, found {kind}")]
    NonNumericMeasure { column: String, kind: ColumnKind },

    /// The top-N limit is absent or zero
    #[error("top_n aggregation requires a limit of at least 1")]
    InvalidLimit,

    /// The period column does not hold timestamps
    #[error("period column `{column}` must be a timestamp, found {kind}")]
    NonTimestampPeriod { column: String, kind: ColumnKind },
}

/// A recoverable condition attached to a result
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Warning {
    /// A filter names a column not present in the dataset; the constraint was skipped
    UnknownFilterColumn { column: String },
    /// A date range names a column that does not hold timestamps; the constraint was skipped
    NonTimestampFilterColumn { column: String, kind: ColumnKind },
    /// Distinct values were requested for a column not present in the dataset
    UnknownColumn { column: String },
    /// Reloading failed and the previously cached dataset was served
    StaleData { reason: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFilterColumn { column } => {
                write!(f, "filter column `{}` not found, constraint skipped", column)
            }
            Self::NonTimestampFilterColumn { column, kind } => write!(
                f,
                "date range column `{}` holds {} values, constraint skipped",
                column, kind
            ),
            Self::UnknownColumn { column } => write!(f, "column `{}` not found", column),
            Self::StaleData { reason } => write!(f, "serving stale data: {}", reason),
        }
    }
}

/// Render an error and its chain of causes on one line.
pub fn error_chain(error: &(dyn Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut current = error.source();
    while let Some(source) = current {
        message.push_str(": ");
        message.push_str(&source.to_string());
        current = source.source();
    }
    message
}

/// Cycle statistics server error type
///
/// This type encapsulates the various errors that may occur.
/// Each variant may result in a different API error response.
#[derive(Debug, Error)]
pub enum CycleStatError {
    /// No dataset could be produced
    #[error("failed to load source data")]
    Load(#[source] Arc<LoadError>),

    /// The aggregation request cannot be answered
    #[error("invalid aggregation request")]
    Config(#[from] ConfigError),

    /// Error deserialising request data
    #[error("request data is not valid")]
    RequestDataJsonRejection(#[from] JsonRejection),

    /// Error validating request data (single error)
    #[error("request data is not valid")]
    RequestDataValidationSingle(#[from] validator::ValidationError),

    /// Error validating request data (multiple errors)
    #[error("request data is not valid")]
    RequestDataValidation(#[from] validator::ValidationErrors),

    /// A worker task panicked or was cancelled
    #[error("error joining worker task")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl From<LoadError> for CycleStatError {
    fn from(error: LoadError) -> Self {
        Self::Load(Arc::new(error))
    }
}

impl From<Arc<LoadError>> for CycleStatError {
    fn from(error: Arc<LoadError>) -> Self {
        Self::Load(error)
    }
}

impl IntoResponse for CycleStatError {
    /// Convert from a `CycleStatError` into an [axum::response::Response].
    fn into_response(self) -> Response {
        ErrorResponse::from(self).into_response()
    }
}

/// Body of error response
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorBody {
    /// Main error message
    message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    caused_by: Option<Vec<String>>,
}

impl ErrorBody {
    /// Return a new ErrorBody
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorBody { message, caused_by }
    }
}

/// A response to send in error cases
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorResponse {
    /// HTTP status of the response
    #[serde(skip)]
    status: StatusCode,

    /// Response body
    error: ErrorBody,
}

impl ErrorResponse {
    /// Return a new ErrorResponse
    ///
    /// # Arguments
    ///
    /// * `status`: HTTP status of the response
    /// * `error`: The error that occurred. This will be formatted into a suitable `ErrorBody`
    fn new<E>(status: StatusCode, error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        ErrorResponse {
            status,
            error: ErrorBody::new(error),
        }
    }

    /// Return a 400 bad request ErrorResponse
    fn bad_request<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    /// Return a 500 internal server error ErrorResponse
    fn internal_server_error<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    /// Return a 503 service unavailable ErrorResponse
    fn service_unavailable<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, error)
    }
}

impl From<CycleStatError> for ErrorResponse {
    /// Convert from a `CycleStatError` into an `ErrorResponse`.
    fn from(error: CycleStatError) -> Self {
        let response = match &error {
            // Bad request
            CycleStatError::Config(_)
            | CycleStatError::RequestDataJsonRejection(_)
            | CycleStatError::RequestDataValidationSingle(_)
            | CycleStatError::RequestDataValidation(_) => Self::bad_request(&error),

            // Service unavailable
            CycleStatError::Load(_) => Self::service_unavailable(&error),

            // Internal server error
            CycleStatError::TaskJoin(_) => Self::internal_server_error(&error),
        };

        // Log server errors.
        if response.status.is_server_error() {
            event!(Level::ERROR, "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }

        response
    }
}

impl IntoResponse for ErrorResponse {
    /// Convert from an `ErrorResponse` into an `axum::response::Response`.
    ///
    /// Renders the response as JSON.
    fn into_response(self) -> Response {
        let json_body = serde_json::to_string_pretty(&self);
        match json_body {
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialise error response: {}", err),
            )
                .into_response(),
            Ok(json_body) => (
                self.status,
                [(&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string())],
                json_body,
            )
                .into_response(),
        }
    }
}
