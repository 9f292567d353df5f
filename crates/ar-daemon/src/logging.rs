//! Tracing initialization for the daemon binary.

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber: `RUST_LOG`-driven filtering (default
/// `info`), human-readable output, or JSON lines when `ARMADA_LOG_JSON=1`.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let json = std::env::var("ARMADA_LOG_JSON").map(|v| v == "1").unwrap_or(false);
    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}
