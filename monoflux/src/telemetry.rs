//! Tracing setup for applications embedding monoflux

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `info`
/// (or `debug` when `verbose`)
///
/// Returns false if a global subscriber was already installed.
pub fn init_tracing(verbose: bool) -> bool {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
