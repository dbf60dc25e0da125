//! Diagnostic tracing for the reviewer binary.
//!
//! Diagnostics go to stderr and are filtered by `RUST_LOG`. The run's
//! product output (task list, execution summary, state) is JSON on stdout,
//! written by `main` regardless of the filter, so CI logs can carry both.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const QUIET: &str = "warn";
const VERBOSE: &str = "warn,reviewer=debug";

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `verbose` picks between warnings only
/// and debug output for this crate.
///
/// ```bash
/// RUST_LOG=reviewer::session=trace reviewer run --pr 12
/// ```
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { VERBOSE } else { QUIET }));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .compact(),
        )
        .init();
}
