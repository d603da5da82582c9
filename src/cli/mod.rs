//! Command-line interface support

pub mod commands;
pub mod error;

use tracing_subscriber::EnvFilter;

/// Install the log subscriber
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));

    // A subscriber may already be installed when called more than once
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
