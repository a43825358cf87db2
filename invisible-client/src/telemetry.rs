//! Tracing bootstrap.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "invisible_client=info,invisible_core=info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into())
}

/// Install a human-readable subscriber. A second call is a no-op.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer())
        .try_init();
}

/// Install a JSON subscriber for log shipping. A second call is a no-op.
pub fn init_json_tracing() {
    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().json())
        .try_init();
}
