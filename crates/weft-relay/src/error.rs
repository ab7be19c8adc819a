//! Error types for the relay server

use thiserror::Error;
use weft_core::CoreError;

/// Relay error types
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Transport failure
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Store failure
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Internal server error
    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

impl From<CoreError> for RelayError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::TransportError(msg) => RelayError::TransportError(msg),
            CoreError::StateStoreError(msg) => RelayError::StateStoreError(msg),
            CoreError::ConfigurationError(msg) => RelayError::ConfigError(msg),
            other => RelayError::InternalError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::InternalError(format!("IO error: {}", err))
    }
}
