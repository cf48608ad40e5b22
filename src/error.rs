use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the devhub supervisor
#[derive(Debug, Error)]
pub enum DevhubError {
    // Service lifecycle errors
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Service already running: {0}")]
    AlreadyRunning(String),

    #[error("Failed to spawn service {0}: {1}")]
    SpawnFailed(String, String),

    #[error("Lost track of service {0}: {1}")]
    MonitorLost(String, String),

    #[error("Failed to stop service {0}: {1}")]
    StopError(String, String),

    #[error("Operation failed for service {0}: {1}")]
    OperationFailed(String, String),

    #[error("Invalid process ID: {0}")]
    InvalidProcessId(String),

    #[error("Signal error: {0}")]
    SignalError(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    #[error("Duplicate service name: {0}")]
    DuplicateService(String),

    // IPC errors
    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Failed to connect to devhub: {0}")]
    ConnectionError(String),

    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    #[error("devhub is not running")]
    DaemonNotRunning,

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse error classes reported by the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    AlreadyRunning,
    OperationFailed,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::AlreadyRunning => write!(f, "already running"),
            ErrorKind::OperationFailed => write!(f, "operation failed"),
        }
    }
}

impl DevhubError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DevhubError::ServiceNotFound(_) => ErrorKind::NotFound,
            DevhubError::AlreadyRunning(_) => ErrorKind::AlreadyRunning,
            _ => ErrorKind::OperationFailed,
        }
    }

    /// Name of the service the error concerns, if any
    pub fn service(&self) -> Option<&str> {
        match self {
            DevhubError::ServiceNotFound(name)
            | DevhubError::AlreadyRunning(name)
            | DevhubError::SpawnFailed(name, _)
            | DevhubError::MonitorLost(name, _)
            | DevhubError::StopError(name, _)
            | DevhubError::OperationFailed(name, _) => Some(name),
            _ => None,
        }
    }
}

/// Result type alias for devhub operations
pub type Result<T> = std::result::Result<T, DevhubError>;
