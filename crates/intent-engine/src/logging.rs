//! Tracing subscriber set-up for the `intentd` binary

use crate::error::EngineError;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber, writing to stderr
///
/// `RUST_LOG` takes precedence over `default_filter`.
///
/// # Errors
/// Returns [`EngineError::Logging`] if a subscriber is already installed
pub fn init(default_filter: &str, json: bool) -> Result<(), EngineError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| EngineError::Logging(e.to_string()))
}
