//! Prometheus metrics

use axum::{body::Body, http::Request, response::Response};
use lazy_static::lazy_static;
use prometheus::{
    self, core::Collector, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts,
    Registry,
};
use tracing::{event, Level, Span};

lazy_static! {
    // Registry for holding metric state
    pub static ref REGISTRY: Registry = Registry::new();
    // Simple request counter
    pub static ref INCOMING_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("incoming_requests", "The number of HTTP requests received"),
        &["http_method"]
    ).unwrap();
    // Request counter by status code
    pub static ref RESPONSE_CODE_COLLECTOR: IntCounterVec = IntCounterVec::new(
        Opts::new("outgoing_response", "The number of responses sent."),
        &["status_code"]
    ).unwrap();
    // Request histogram by response time
    pub static ref RESPONSE_TIME_COLLECTOR: HistogramVec = HistogramVec::new(
        HistogramOpts{
            common_opts: Opts::new("response_time", "The time taken to respond to each request"),
            buckets: prometheus::DEFAULT_BUCKETS.to_vec(), // Change buckets here if desired
        },
        &[],
    ).unwrap();
    // Dataset lookups by cache outcome (hit, miss, coalesced, stale)
    pub static ref CACHE_LOOKUPS: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_lookups", "The number of dataset lookups by cache outcome"),
        &["outcome"]
    ).unwrap();
    // Reload histogram by duration
    pub static ref RELOAD_TIME_COLLECTOR: HistogramVec = HistogramVec::new(
        HistogramOpts{
            common_opts: Opts::new("reload_time", "The time taken to reload the dataset from its sources"),
            buckets: vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
        },
        &["status"],
    ).unwrap();
    // Rows in the installed dataset
    pub static ref DATASET_ROWS: IntGauge = IntGauge::new(
        "dataset_rows", "The number of rows in the installed dataset"
    ).unwrap();
    // Query counter by aggregation mode
    pub static ref QUERIES: IntCounterVec = IntCounterVec::new(
        Opts::new("queries", "The number of queries answered by aggregation mode"),
        &["mode"]
    ).unwrap();
    // Query histogram by time spent filtering and aggregating
    pub static ref QUERY_TIME_COLLECTOR: HistogramVec = HistogramVec::new(
        HistogramOpts{
            common_opts: Opts::new("query_time", "The time taken to answer each query"),
            buckets: prometheus::DEFAULT_BUCKETS.to_vec(),
        },
        &["mode"],
    ).unwrap();
}

/// Register every metric with [REGISTRY].
///
/// Metrics that are already registered are skipped.
pub fn register_metrics() {
    let collectors: [Box<dyn Collector>; 8] = [
        Box::new(INCOMING_REQUESTS.clone()),
        Box::new(RESPONSE_CODE_COLLECTOR.clone()),
        Box::new(RESPONSE_TIME_COLLECTOR.clone()),
        Box::new(CACHE_LOOKUPS.clone()),
        Box::new(RELOAD_TIME_COLLECTOR.clone()),
        Box::new(DATASET_ROWS.clone()),
        Box::new(QUERIES.clone()),
        Box::new(QUERY_TIME_COLLECTOR.clone()),
    ];
    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(error) => event!(Level::ERROR, %error, "failed to register metric"),
        }
    }
}

/// Render the registered metrics in the Prometheus text format.
pub async fn metrics_handler() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(error) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        event!(Level::ERROR, %error, "failed to encode metrics");
    }

    String::from_utf8_lossy(&buffer).into_owned()
}

/// Increments the prometheus counter on all incoming requests, labelled by http method
pub fn request_counter(request: &Request<Body>, _span: &Span) {
    INCOMING_REQUESTS
        .with_label_values(&[&request.method().to_string().to_ascii_uppercase()])
        .inc();
}

/// Increment the prometheus counter on all outgoing responses, labelled by status code
pub fn record_response_metrics<B>(
    response: &Response<B>,
    latency: std::time::Duration,
    _span: &Span,
) {
    RESPONSE_CODE_COLLECTOR
        .with_label_values(&[response.status().as_str()])
        .inc();

    RESPONSE_TIME_COLLECTOR
        .with_label_values(&[])
        .observe(latency.as_secs_f64());
}
