//! Tracing/logging initialization.
//!
//! JSON lines on stdout. Targets are kept in the output so access decisions
//! mirrored by the audit sink (target `audit`) can be routed separately, e.g.
//! `RUST_LOG=info,audit=info,gatekeep_infra=debug`.

use tracing_subscriber::EnvFilter;

/// Initialize tracing with `RUST_LOG`, or `default_directive` when it is unset
/// or unparsable.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init_with_default(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(true)
        .with_current_span(true)
        .try_init();
}
