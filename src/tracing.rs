//! Tracing (logging)

use crate::cli::CommandLineArgs;

use tracing::{event, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initlialise tracing (logging)
///
/// Applies a filter based on the `RUST_LOG` environment variable, falling back to enable debug
/// logging for this crate and tower_http if not set.
///
/// If enabled, spans are also exported to a Jaeger agent.
pub fn init_tracing(args: &CommandLineArgs) {
    let (tracer, jaeger_error) = if args.enable_jaeger {
        match opentelemetry_jaeger::new_agent_pipeline()
            .with_service_name("cyclestat")
            .install_simple()
        {
            Ok(tracer) => (Some(tracer), None),
            Err(error) => (None, Some(error)),
        }
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cyclestat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer)))
        .init();

    if let Some(error) = jaeger_error {
        event!(Level::ERROR, %error, "failed to install Jaeger tracing pipeline");
    }
}

/// Flush any remaining spans to Jaeger.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
