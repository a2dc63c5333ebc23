//! Tracing subscriber initialization.
//!
//! The engine only emits `tracing` events; installing a subscriber is left to
//! the host process. Filtering follows `RUST_LOG`.

use tracing_subscriber::EnvFilter;

fn filter_or(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// JSON logs with timestamps, `info` by default.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_or("info"))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Compact logs routed through the libtest capture, `debug` by default.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter_or("debug"))
        .with_test_writer()
        .compact()
        .try_init();
}
