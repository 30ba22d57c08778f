//! Cyclestat web application

use crate::app_state::SharedAppState;
use crate::cli::CommandLineArgs;
use crate::error::CycleStatError;
use crate::metrics::{metrics_handler, record_response_metrics, request_counter};
use crate::models::{CacheStatus, DistinctValues, InvalidateReport, QueryRequest, QueryResult};
use crate::validated_json::ValidatedJson;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower::Layer;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;
use tracing::{event, Level};

/// Application service type, for use in the web server.
pub type Service = NormalizePath<Router>;

/// Initialise the application
///
/// Builds the global Rayon thread pool if Rayon is enabled.
pub fn init(args: &CommandLineArgs) {
    if args.use_rayon {
        let threads = args
            .thread_limit
            .unwrap_or_else(|| num_cpus::get().saturating_sub(1))
            .max(1);
        if let Err(error) = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
        {
            event!(Level::WARN, %error, "failed to build Rayon thread pool");
        }
    }
}

/// Returns a [axum::Router] for the Cyclestat API
///
/// The router is populated with all routes as well as the following middleware:
///
/// * a [TraceLayer] for tracing requests and responses, which also records Prometheus metrics
fn router(state: SharedAppState) -> Router {
    fn v1() -> Router<SharedAppState> {
        Router::new()
            .route("/query", post(query))
            .route("/values/:column", get(distinct_values))
            .route("/cache", get(cache_status))
            .route("/cache/invalidate", post(invalidate))
    }

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .nest("/v1", v1())
        .layer(
            TraceLayer::new_for_http()
                .on_request(request_counter)
                .on_response(record_response_metrics),
        )
        .with_state(state)
}

/// Returns a [Service] for the Cyclestat API
///
/// The service is populated with all routes as well as the following middleware:
///
/// * a [NormalizePathLayer] for trimming trailing slashes from requests
pub fn service(state: SharedAppState) -> Service {
    NormalizePathLayer::trim_trailing_slash().layer(router(state))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Filter and aggregate the cycle records
async fn query(
    State(state): State<SharedAppState>,
    ValidatedJson(request): ValidatedJson<QueryRequest>,
) -> Result<Json<QueryResult>, CycleStatError> {
    state
        .queries
        .run(&request.filters, &request.aggregation)
        .await
        .map(Json)
}

/// List the distinct values of a column, for populating filter choices
async fn distinct_values(
    State(state): State<SharedAppState>,
    Path(column): Path<String>,
) -> Result<Json<DistinctValues>, CycleStatError> {
    state.queries.list_distinct_values(&column).await.map(Json)
}

async fn cache_status(
    State(state): State<SharedAppState>,
) -> Result<Json<CacheStatus>, CycleStatError> {
    state.queries.cache_status().await.map(Json)
}

async fn invalidate(State(state): State<SharedAppState>) -> Json<InvalidateReport> {
    Json(state.queries.force_invalidate())
}
