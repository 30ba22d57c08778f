//! This file defines the cyclestat binary entry point.

use cyclestat::app;
use cyclestat::app_state::AppState;
use cyclestat::cli;
use cyclestat::error::error_chain;
use cyclestat::metrics;
use cyclestat::server;
use cyclestat::tracing;

use std::process::exit;
use std::sync::Arc;

use ::tracing::{event, Level};

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing(&args);
    event!(Level::DEBUG, ?args, "starting");
    metrics::register_metrics();
    app::init(&args);
    let state = match AppState::new(&args) {
        Ok(state) => Arc::new(state),
        Err(error) => {
            event!(Level::ERROR, error = %error_chain(&error), "failed to initialise");
            tracing::shutdown_tracing();
            exit(1)
        }
    };
    server::serve(&args, app::service(state)).await;
    tracing::shutdown_tracing();
}
