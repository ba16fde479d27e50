//! Diagnostic tracing for the repair loop.
//!
//! Tracing output goes to stderr and is separate from both the bracketed
//! progress lines (`[loop]`, `[codex]`, ...) printed on stdout and the LLM
//! interaction log under `logs/`, which is always written.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
fn default_directive(verbose: bool) -> &'static str {
    if verbose { "ci_runtime=info,warn" } else { "warn" }
}

/// Install the global subscriber. `RUST_LOG` wins over `--verbose`.
///
/// ```bash
/// RUST_LOG=ci_runtime=debug ci-runtime --command "pytest -q"
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    // A subscriber may already be set when embedded in a test harness.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .compact(),
        )
        .try_init();
}
