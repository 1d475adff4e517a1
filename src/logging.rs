//! Optional logging bootstrap for binaries without a tracing stack.
//!
//! Enabled with the `logging` cargo feature. Library users should install
//! their own subscriber instead; this exists so small daemons and examples
//! get sane output with one call.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber with env-filter support.
///
/// Reads `RUST_LOG` (defaulting to `info`) and writes human-readable lines
/// to stderr. Panics if a global subscriber is already set.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
