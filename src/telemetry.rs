use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "tapblitz_backend=info,actix_web=info";

/// Install the global subscriber using the configured `RUST_LOG` directives
pub fn init_telemetry(rust_log: &str) {
    tracing_subscriber::registry()
        .with(env_filter(rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn env_filter(rust_log: &str) -> EnvFilter {
    EnvFilter::try_new(rust_log).unwrap_or_else(|_| DEFAULT_FILTER.into())
}
