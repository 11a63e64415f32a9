//! Structured logging for manage/compute/report.
//!
//! Every role calls [`init`] once at start-up, before touching any IPC
//! resource. Purely observational: nothing here is part of the wire
//! protocol or the shared-memory layout — this is ambient operational
//! logging, not a human-facing report format.

use tracing_subscriber::EnvFilter;

/// Initialize the global `tracing` subscriber. Honors `RUST_LOG` if set,
/// otherwise falls back to `level`. Safe to call more than once per
/// process only if `fmt().try_init()` is tolerant of it, which it is not —
/// call this exactly once, at the top of `main`.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Initialize at the default `info` level.
pub fn init_default() {
    init("info");
}
