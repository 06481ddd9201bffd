use serde::{Deserialize, Serialize};

/// Coarse error classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    InterfaceIncomplete,
    LoadError,
    DelegateFailure,
    Timeout,
    Unauthorized,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum TeamserverError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),
    #[error("listener not found: {0}")]
    ListenerNotFound(String),
    #[error("plugin not found: {0}")]
    PluginNotFound(String),
    #[error("agent type not found: {0}")]
    TypeNotFound(String),
    #[error("listener protocol \"{0}\" has not been registered")]
    ProtocolNotFound(String),
    #[error("resource '{file}' is not provided by plugin '{plugin}'")]
    ResourceNotFound { plugin: String, file: String },
    #[error("operator not connected: {0}")]
    OperatorNotConnected(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("plugin already registered: {0}")]
    AlreadyRegistered(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("plugin '{plugin}' does not implement {missing}")]
    InterfaceIncomplete { plugin: String, missing: String },
    #[error("failed to load extension: {0}")]
    LoadError(String),
    #[error("plugin '{plugin}' failed: {message}")]
    DelegateFailure { plugin: String, message: String },
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("teamserver is shutting down")]
    ShuttingDown,
}

impl TeamserverError {
    /// Wraps a capability call failure, keeping the whole error chain.
    pub fn delegate(plugin: &str, err: anyhow::Error) -> Self {
        Self::DelegateFailure {
            plugin: plugin.to_string(),
            message: format!("{:#}", err),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AgentNotFound(_)
            | Self::ListenerNotFound(_)
            | Self::PluginNotFound(_)
            | Self::TypeNotFound(_)
            | Self::ProtocolNotFound(_)
            | Self::ResourceNotFound { .. }
            | Self::OperatorNotConnected(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) | Self::AlreadyRegistered(_) => ErrorKind::AlreadyExists,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::InterfaceIncomplete { .. } => ErrorKind::InterfaceIncomplete,
            Self::LoadError(_) => ErrorKind::LoadError,
            Self::DelegateFailure { .. } => ErrorKind::DelegateFailure,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Persistence(_) | Self::ShuttingDown => ErrorKind::Internal,
        }
    }
}

pub type TeamserverResult<T> = std::result::Result<T, TeamserverError>;
