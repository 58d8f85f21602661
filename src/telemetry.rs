//! Tracing subscriber installation.

use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Failure to install the global subscriber.
#[derive(Debug, Clone, Error)]
pub enum TelemetryError {
    /// The fallback directive does not parse.
    #[error("invalid log directive '{directive}': {cause}")]
    InvalidDirective {
        /// The rejected directive.
        directive: String,
        /// Parser message.
        cause: String,
    },
    /// A global subscriber is already installed.
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInstalled(Arc<dyn std::error::Error + Send + Sync>),
}

/// Installs a formatted subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` when the variable is unset or invalid.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the fallback directive is invalid or a
/// subscriber is already installed.
pub fn init_tracing(default_directive: &str) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|err| TelemetryError::InvalidDirective {
            directive: default_directive.to_owned(),
            cause: err.to_string(),
        })?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| TelemetryError::AlreadyInstalled(Arc::from(err)))
}
