//! Error types for Ratekeeper.

use thiserror::Error;

/// Main error type for Ratekeeper operations.
///
/// Every variant is raised while building or configuring a limiter. Once an
/// engine is installed, admission outcomes travel as
/// [`Decision`](crate::ratelimit::Decision) values instead.
#[derive(Error, Debug)]
pub enum RatekeeperError {
    /// A key required by the selected algorithm is absent
    #[error("Missing configuration key: {key}")]
    MissingKey { key: String },

    /// A key is present but does not parse as its expected type
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// Configuration file errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// An engine needs a tokio runtime that is not available
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RatekeeperError {
    pub(crate) fn missing(key: &str) -> Self {
        RatekeeperError::MissingKey {
            key: key.to_string(),
        }
    }

    pub(crate) fn invalid(key: &str, value: &str, reason: impl ToString) -> Self {
        RatekeeperError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for Ratekeeper operations.
pub type Result<T> = std::result::Result<T, RatekeeperError>;
