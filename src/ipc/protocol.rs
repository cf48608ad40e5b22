use crate::control::{ControlAction, HealthReport};
use crate::error::{DevhubError, ErrorKind};
use crate::logs::SearchMatch;
use crate::service::ServiceInfo;
use serde::{Deserialize, Serialize};

/// Options for reading a service's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogOptions {
    pub name: String,
    pub lines: Option<usize>,
    pub offset: Option<usize>,
}

/// Options for searching a service's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub name: String,
    pub pattern: String,
    pub context_lines: Option<usize>,
    pub max_results: Option<usize>,
}

/// All available commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    List,
    Get { name: String },
    Health { name: String },
    Logs(LogOptions),
    Search(SearchOptions),
    Control { name: String, action: ControlAction },
}

/// Response data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseData {
    ServiceList(Vec<ServiceInfo>),
    Service(ServiceInfo),
    Health(HealthReport),
    Logs(Vec<String>),
    Matches(Vec<SearchMatch>),
    /// A control action was issued
    Done { name: String, action: ControlAction },
}

/// Failure reply that keeps the error category for automation clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub kind: ErrorKind,
    /// Service the error is about, when there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub message: String,
}

impl From<&DevhubError> for ErrorReply {
    fn from(error: &DevhubError) -> Self {
        Self {
            kind: error.kind(),
            service: error.service().map(str::to_string),
            message: error.to_string(),
        }
    }
}

impl From<ErrorReply> for DevhubError {
    fn from(reply: ErrorReply) -> Self {
        match (reply.kind, reply.service) {
            (ErrorKind::NotFound, Some(name)) => DevhubError::ServiceNotFound(name),
            (ErrorKind::AlreadyRunning, Some(name)) => DevhubError::AlreadyRunning(name),
            _ => DevhubError::Other(reply.message),
        }
    }
}

impl std::fmt::Display for ErrorReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

/// Request message from client to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: Command,
}

/// Response message from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub result: Result<ResponseData, ErrorReply>,
}

impl Request {
    pub fn new(id: u64, command: Command) -> Self {
        Self { id, command }
    }
}

impl Response {
    pub fn success(id: u64, data: ResponseData) -> Self {
        Self {
            id,
            result: Ok(data),
        }
    }

    pub fn error(id: u64, error: &DevhubError) -> Self {
        Self {
            id,
            result: Err(error.into()),
        }
    }
}
