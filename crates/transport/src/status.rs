//! Protocol status codes returned by storage nodes
//!
//! Codes are grouped by section: 0 success, 1024+ common failures, 2048+
//! object, 3072+ container, 4096+ session. Codes this client does not know
//! are preserved as `Unknown` so callers can still inspect them.

use std::fmt;

/// Outcome reported by a node alongside a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    InternalServerError,
    WrongMagicNumber,
    SignatureVerificationFailure,
    NodeUnderMaintenance,
    ObjectAccessDenied,
    ObjectNotFound,
    ObjectLocked,
    LockNonRegularObject,
    ObjectAlreadyRemoved,
    OutOfRange,
    ContainerNotFound,
    EaclNotFound,
    SessionTokenNotFound,
    SessionTokenExpired,
    /// Object is split into parts; the response carries split info instead
    /// of the object. Not a wire status code.
    SplitInfo,
    Unknown(u32),
}

impl Status {
    /// Map a wire status code to a known status.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Status::Ok,
            1024 => Status::InternalServerError,
            1025 => Status::WrongMagicNumber,
            1026 => Status::SignatureVerificationFailure,
            1027 => Status::NodeUnderMaintenance,
            2048 => Status::ObjectAccessDenied,
            2049 => Status::ObjectNotFound,
            2050 => Status::ObjectLocked,
            2051 => Status::LockNonRegularObject,
            2052 => Status::ObjectAlreadyRemoved,
            2053 => Status::OutOfRange,
            3072 => Status::ContainerNotFound,
            3073 => Status::EaclNotFound,
            4096 => Status::SessionTokenNotFound,
            4097 => Status::SessionTokenExpired,
            other => Status::Unknown(other),
        }
    }

    /// Wire code, or `None` for `SplitInfo`.
    pub fn code(self) -> Option<u32> {
        let code = match self {
            Status::Ok => 0,
            Status::InternalServerError => 1024,
            Status::WrongMagicNumber => 1025,
            Status::SignatureVerificationFailure => 1026,
            Status::NodeUnderMaintenance => 1027,
            Status::ObjectAccessDenied => 2048,
            Status::ObjectNotFound => 2049,
            Status::ObjectLocked => 2050,
            Status::LockNonRegularObject => 2051,
            Status::ObjectAlreadyRemoved => 2052,
            Status::OutOfRange => 2053,
            Status::ContainerNotFound => 3072,
            Status::EaclNotFound => 3073,
            Status::SessionTokenNotFound => 4096,
            Status::SessionTokenExpired => 4097,
            Status::SplitInfo => return None,
            Status::Unknown(code) => code,
        };
        Some(code)
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// Session not found or expired on the node.
    pub fn is_session_error(self) -> bool {
        matches!(
            self,
            Status::SessionTokenNotFound | Status::SessionTokenExpired
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::InternalServerError => "internal_server_error",
            Status::WrongMagicNumber => "wrong_magic_number",
            Status::SignatureVerificationFailure => "signature_verification_failure",
            Status::NodeUnderMaintenance => "node_under_maintenance",
            Status::ObjectAccessDenied => "object_access_denied",
            Status::ObjectNotFound => "object_not_found",
            Status::ObjectLocked => "object_locked",
            Status::LockNonRegularObject => "lock_non_regular_object",
            Status::ObjectAlreadyRemoved => "object_already_removed",
            Status::OutOfRange => "out_of_range",
            Status::ContainerNotFound => "container_not_found",
            Status::EaclNotFound => "eacl_not_found",
            Status::SessionTokenNotFound => "session_token_not_found",
            Status::SessionTokenExpired => "session_token_expired",
            Status::SplitInfo => "split_info",
            Status::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Unknown(code) => write!(f, "unknown status {code}"),
            other => f.write_str(other.label()),
        }
    }
}
