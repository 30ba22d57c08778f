//! This crate provides a cached filter and aggregation server for operational cycle records.
//!
//! Cycle records are read from a directory of JSON Lines sources into an in-memory
//! [Dataset](types::Dataset). The dataset is cached and reused for as long as the fingerprint of
//! the sources (their names, modification times and sizes) is unchanged. Concurrent requests that
//! find the cache stale share a single reload, and a failed reload falls back to the previously
//! cached dataset with a warning.
//!
//! Queries filter the dataset by column values and date ranges and aggregate the remaining rows
//! by a group column, optionally split into monthly or daily periods. Supported aggregations are
//! counts, sums, top N with a remainder group, and ratios (mean measure per row).
//!
//! The server is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team, on top of the [hyper] HTTP library.
//! * [Serde](serde) performs (de)serialisation of JSON request and response data and of the
//!   source records.
//! * [Rayon](rayon) parallelises filtering and aggregation of large datasets.

pub mod aggregate;
pub mod app;
pub mod app_state;
pub mod cache;
pub mod cli;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod loader;
pub mod metrics;
pub mod models;
pub mod query;
pub mod server;
pub mod source;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod types;
pub mod validated_json;
