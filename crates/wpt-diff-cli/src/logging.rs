//! Tracing subscriber setup.

use crate::config::Verbosity;
use tracing_subscriber::EnvFilter;

/// Filter for the stderr subscriber: `RUST_LOG` wins, otherwise the level
/// follows the verbosity flags and config file
#[must_use]
pub fn env_filter(verbosity: Verbosity, debug: bool, verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive(verbosity, debug, verbose)))
}

fn directive(verbosity: Verbosity, debug: bool, verbose: bool) -> &'static str {
    let effective = if verbosity.is_quiet() {
        Verbosity::Quiet
    } else if debug {
        Verbosity::Debug
    } else if verbose {
        verbosity.max(Verbosity::Verbose)
    } else {
        verbosity
    };
    effective.log_directive()
}

/// Install the global subscriber on stderr. Later calls are no-ops.
pub fn init_logging(verbosity: Verbosity, debug: bool, verbose: bool, color: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbosity, debug, verbose))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(color)
        .try_init();
}
