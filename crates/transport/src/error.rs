//! Error types for node transports

use std::time::Duration;

use crate::status::Status;

/// Errors from a single node connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("dial failed: {0}")]
    Dial(String),

    #[error("client is not dialed")]
    NotDialed,

    #[error("client is closed")]
    Closed,

    #[error("io: {0}")]
    Io(String),

    /// Node answered with a non-OK status.
    #[error("status: {0}")]
    Status(Status),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    /// Status reported by the node, if this error carries one.
    pub fn status(&self) -> Option<Status> {
        match self {
            TransportError::Status(status) => Some(*status),
            _ => None,
        }
    }

    pub fn is_session_error(&self) -> bool {
        self.status().is_some_and(Status::is_session_error)
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
