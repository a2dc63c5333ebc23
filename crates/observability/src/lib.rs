//! Tracing and logging setup shared by engine hosts and tests.

/// Initialize process-wide tracing with JSON output.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Human-readable output captured by the test harness, `debug` unless `RUST_LOG` says otherwise.
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Subscriber construction (filters, formatters).
pub mod tracing;
