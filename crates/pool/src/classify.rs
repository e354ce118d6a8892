//! Failure classification for node calls
//!
//! Separates failures that say something about the node (it is broken,
//! overloaded, on the wrong network, unreachable) from failures that are a
//! normal answer to a bad request. Only the former count toward the node's
//! health threshold.

use transport::{Status, TransportError};

/// How a failed call affects the node that served it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Counts toward the error threshold.
    HealthAffecting,
    /// A valid answer from a healthy node.
    Application,
}

impl ErrorClass {
    pub fn is_health_affecting(self) -> bool {
        self == ErrorClass::HealthAffecting
    }
}

/// Classify a node status.
///
/// Statuses this client does not recognize are application-level unless
/// `count_unknown` is set.
pub fn classify_status(status: Status, count_unknown: bool) -> ErrorClass {
    match status {
        Status::InternalServerError
        | Status::WrongMagicNumber
        | Status::SignatureVerificationFailure
        | Status::NodeUnderMaintenance => ErrorClass::HealthAffecting,
        Status::Unknown(_) if count_unknown => ErrorClass::HealthAffecting,
        Status::Ok
        | Status::ObjectAccessDenied
        | Status::ObjectNotFound
        | Status::ObjectLocked
        | Status::LockNonRegularObject
        | Status::ObjectAlreadyRemoved
        | Status::OutOfRange
        | Status::ContainerNotFound
        | Status::EaclNotFound
        | Status::SessionTokenNotFound
        | Status::SessionTokenExpired
        | Status::SplitInfo
        | Status::Unknown(_) => ErrorClass::Application,
    }
}

/// Classify a transport failure. Anything that is not a node status
/// (connection loss, timeout, garbage on the wire) affects health.
pub fn classify(err: &TransportError, count_unknown: bool) -> ErrorClass {
    match err {
        TransportError::Status(status) => classify_status(*status, count_unknown),
        TransportError::Dial(_)
        | TransportError::NotDialed
        | TransportError::Closed
        | TransportError::Io(_)
        | TransportError::Malformed(_)
        | TransportError::Timeout(_) => ErrorClass::HealthAffecting,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn node_side_statuses_affect_health() {
        for status in [
            Status::InternalServerError,
            Status::WrongMagicNumber,
            Status::SignatureVerificationFailure,
            Status::NodeUnderMaintenance,
        ] {
            assert_eq!(
                classify_status(status, false),
                ErrorClass::HealthAffecting,
                "{status}"
            );
        }
    }

    #[test]
    fn application_statuses_do_not_affect_health() {
        for status in [
            Status::ObjectNotFound,
            Status::ObjectAccessDenied,
            Status::ObjectAlreadyRemoved,
            Status::SplitInfo,
            Status::ContainerNotFound,
            Status::EaclNotFound,
            Status::SessionTokenNotFound,
            Status::SessionTokenExpired,
            Status::ObjectLocked,
            Status::OutOfRange,
        ] {
            assert_eq!(
                classify_status(status, true),
                ErrorClass::Application,
                "{status}"
            );
        }
    }

    #[test]
    fn unknown_status_follows_setting() {
        let status = Status::from_code(9999);
        assert_eq!(classify_status(status, false), ErrorClass::Application);
        assert_eq!(classify_status(status, true), ErrorClass::HealthAffecting);
    }

    #[test]
    fn transport_failures_affect_health() {
        for err in [
            TransportError::Io("connection reset".into()),
            TransportError::Closed,
            TransportError::Malformed("truncated frame".into()),
            TransportError::Timeout(Duration::from_secs(10)),
        ] {
            assert!(classify(&err, false).is_health_affecting(), "{err}");
        }
    }

    #[test]
    fn transport_status_delegates() {
        let err = TransportError::Status(Status::ObjectNotFound);
        assert_eq!(classify(&err, false), ErrorClass::Application);
    }
}
