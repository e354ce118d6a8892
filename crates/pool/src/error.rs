//! Error types for pool operations

use transport::{Status, TransportError};

/// Errors from pool construction, selection and calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No group had a healthy node to hand out.
    #[error("no healthy client")]
    NoHealthyClient,

    /// `dial` finished without a single node becoming healthy.
    #[error("no healthy nodes after dial")]
    NoHealthyNodes,

    #[error("pool already dialed")]
    AlreadyDialed,

    #[error("pool not dialed")]
    NotDialed,

    #[error("pool closed")]
    Closed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("node {address}: {source}")]
    Transport {
        address: String,
        #[source]
        source: TransportError,
    },

    #[error("session: {0}")]
    Session(#[from] session::Error),

    #[error("node not found: {0}")]
    NodeNotFound(String),
}

impl Error {
    pub(crate) fn transport(address: &str, source: TransportError) -> Self {
        Error::Transport {
            address: address.to_string(),
            source,
        }
    }

    /// Status reported by the node, if the failure carried one.
    pub fn status(&self) -> Option<Status> {
        match self {
            Error::Transport { source, .. } => source.status(),
            _ => None,
        }
    }

    /// The node no longer knows the session, or it expired.
    pub fn is_session_error(&self) -> bool {
        self.status().is_some_and(Status::is_session_error)
    }
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
