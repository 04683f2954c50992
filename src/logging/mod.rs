//! # Logging Module
//!
//! This module sets up the global `tracing` subscriber for Parcelgate.
//!
//! ## Features
//!
//! - **Filter Precedence**: `PARCELGATE_LOG_LEVEL`, then `RUST_LOG`, then the built-in default
//! - **Early Start**: Installed before environment validation so its warnings are visible
//! - **Stderr Output**: Stdout stays clean for CLI output such as issued tokens
//! - **Idempotent**: A second call is a no-op, so tests and the CLI can both call it

use crate::env::DEFAULT_LOG_FILTER;
use tracing_subscriber::EnvFilter;

pub const LOG_LEVEL_VAR: &str = "PARCELGATE_LOG_LEVEL";

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Build the filter from the environment, falling back to the default
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_LEVEL_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();

    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init_tracing();
        init_tracing();
    }
}
