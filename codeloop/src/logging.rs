//! Diagnostic tracing for the orchestrators and adapters.
//!
//! Tracing goes to stderr and is filtered by `RUST_LOG` (default `warn`).
//! Run logs under `.codeloop/runs/` are product output and are written
//! regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Compact format on stderr.
///
/// ```bash
/// RUST_LOG=codeloop=debug codeloop run "add a --verbose flag"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
