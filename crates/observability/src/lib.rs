//! Process-wide tracing setup shared by the gatekeep binaries.

/// Subscriber installation (filters, JSON formatting).
pub mod tracing;

/// Install the JSON subscriber with `RUST_LOG`, falling back to `info`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init_with_default("info");
}
