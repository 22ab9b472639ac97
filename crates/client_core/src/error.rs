use shared::domain::{EntityKind, TaskId};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Validation,
    NotFound,
    SessionExpired,
    Cancelled,
    Conflict,
    Internal,
}

/// Failure reported by a remote adapter call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("your session has expired, please log in again")]
    SessionExpired,
    #[error("request failed with status {status}: {message}")]
    Unexpected { status: u16, message: String },
    #[error("malformed response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::SessionExpired => ErrorKind::SessionExpired,
            Self::Unexpected { .. } | Self::Decode(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("command cancelled before it settled")]
    Cancelled,
    #[error("another {entity} mutation for {id} is still in flight")]
    Busy { entity: EntityKind, id: String },
    #[error("task {0} is not loaded")]
    UnknownTask(TaskId),
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Remote(err) => err.kind(),
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Busy { .. } => ErrorKind::Conflict,
            Self::UnknownTask(_) => ErrorKind::NotFound,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::SessionExpired))
    }
}
