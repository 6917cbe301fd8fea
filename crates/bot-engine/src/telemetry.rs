//! Tracing initialization: a plain `tracing_subscriber::fmt` + `EnvFilter`
//! setup. No OpenTelemetry collector is part of this crate's scope.

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber reading `RUST_LOG`, falling back
/// to `info` when unset. Safe to call more than once per process (e.g.
/// from multiple integration test binaries); later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();
}
