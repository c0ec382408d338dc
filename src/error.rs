//! Error types for the engine gateway.

use crate::config::ConfigurationError;
use crate::hub::transport::InvokeError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Worker {0} not found")]
    WorkerNotFound(Uuid),
    #[error("Worker {0} already exists")]
    WorkerExists(Uuid),
    #[error("Unknown streaming backend '{0}'")]
    UnknownBackend(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Repository error: {0}")]
    Repository(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("State transition error: {0}")]
    StateTransition(String),
    #[error("Hub {0} is not configured")]
    HubNotFound(String),
    #[error("Hub {0} is already configured")]
    HubExists(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Create a repository error from any displayable cause
    pub fn repository(message: impl Into<String>) -> Self {
        Self::Repository(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether the error originates from the peer transport and should trigger a reconnect
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(error: serde_json::Error) -> Self {
        GatewayError::Serialization(format!("JSON serialization error: {error}"))
    }
}

impl From<ConfigurationError> for GatewayError {
    fn from(error: ConfigurationError) -> Self {
        GatewayError::Configuration(error.to_string())
    }
}

impl From<InvokeError> for GatewayError {
    fn from(error: InvokeError) -> Self {
        GatewayError::Transport(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
