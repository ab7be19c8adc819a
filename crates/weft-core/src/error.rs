use thiserror::Error;

/// Core error type for the Weft runtime
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Workflow definition failed validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// No action registered under the requested name
    #[error("Action not found: {0}")]
    ActionNotFound(String),

    /// An action body failed during execution
    #[error("Action execution error: {0}")]
    ActionExecutionError(String),

    /// Persisted store operation failed
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Channel send/receive failure
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Timer error
    #[error("Timer error: {0}")]
    TimerError(String),

    /// Input/output error
    #[error("Input/output error: {0}")]
    IOError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::IOError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}
