//! Tracing subscriber setup
//!
//! The library only emits `tracing` events. The embedding application calls
//! [`init_logging`] once at start-up to print them.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber filtered by `RUST_LOG`, falling back to the
/// configured level
///
/// Returns `false` if a global subscriber was already installed; calling it
/// twice is harmless.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
