//! Error types for session operations

/// Errors from session token handling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid session token ID: {0}")]
    InvalidId(String),

    #[error("invalid public session key: {0}")]
    InvalidKey(String),

    #[error("sign token of the opened session: {0}")]
    Sign(String),

    #[error("encode session token: {0}")]
    Encoding(String),

    #[error("session token expired at epoch {expiration} (current epoch {epoch})")]
    Expired { expiration: u64, epoch: u64 },
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
