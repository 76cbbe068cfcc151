//! Engine error taxonomy
//!
//! The driver surfaces failures as numeric codes and message fragments that
//! vary across engine versions. Everything is normalized here, once, so the
//! bootstrap coordinator and reconciler branch on stable variants only.

use std::sync::LazyLock;

use mongodb::error::{Error as DriverError, ErrorKind};

// Engine admin-command error codes.
const CODE_UNAUTHORIZED: i32 = 13;
const CODE_AUTHENTICATION_FAILED: i32 = 18;
const CODE_ALREADY_INITIALIZED: i32 = 23;
const CODE_NOT_YET_INITIALIZED: i32 = 94;
const CODE_NOT_WRITABLE_PRIMARY: i32 = 10107;
const CODE_NOT_PRIMARY_NO_SECONDARY_OK: i32 = 13435;

static AUTH_MESSAGE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new("Authentication|requires authentication").expect("invalid regex pattern")
});

const SET_MISMATCH_FRAGMENT: &str = "replica set ID did not match";

/// Normalized engine errors
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("engine is not primary")]
    NotPrimary,

    #[error("engine requires authentication: {0}")]
    AuthRequired(String),

    #[error("replica set identity mismatch: {0}")]
    ReplicaSetMismatch(String),

    #[error("replica set not initialized")]
    NotInitialized,

    #[error("replica set already initialized")]
    AlreadyInitialized,

    #[error("engine unreachable: {0}")]
    Unreachable(String),

    #[error("malformed engine response: {0}")]
    Malformed(String),

    #[error("engine error: {0}")]
    Unknown(String),
}

impl EngineError {
    /// Classify a command message into the taxonomy, given its code.
    fn from_command(code: i32, message: &str) -> Self {
        match code {
            CODE_NOT_WRITABLE_PRIMARY | CODE_NOT_PRIMARY_NO_SECONDARY_OK => EngineError::NotPrimary,
            CODE_UNAUTHORIZED | CODE_AUTHENTICATION_FAILED => {
                EngineError::AuthRequired(message.to_string())
            }
            CODE_NOT_YET_INITIALIZED => EngineError::NotInitialized,
            CODE_ALREADY_INITIALIZED => EngineError::AlreadyInitialized,
            _ if message.contains(SET_MISMATCH_FRAGMENT) => {
                EngineError::ReplicaSetMismatch(message.to_string())
            }
            _ if AUTH_MESSAGE.is_match(message) => EngineError::AuthRequired(message.to_string()),
            _ => EngineError::Unknown(message.to_string()),
        }
    }
}

impl From<DriverError> for EngineError {
    fn from(err: DriverError) -> Self {
        match err.kind.as_ref() {
            ErrorKind::Command(command) => {
                EngineError::from_command(command.code, &command.message)
            }
            ErrorKind::Authentication { message, .. } => EngineError::AuthRequired(message.clone()),
            ErrorKind::ServerSelection { message, .. } => EngineError::Unreachable(message.clone()),
            ErrorKind::Io(io) => EngineError::Unreachable(io.to_string()),
            other => EngineError::Unknown(format!("{:?}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_primary_codes() {
        assert!(matches!(
            EngineError::from_command(10107, "not primary"),
            EngineError::NotPrimary
        ));
        assert!(matches!(
            EngineError::from_command(13435, "not primary and slaveOk=false"),
            EngineError::NotPrimary
        ));
    }

    #[test]
    fn test_auth_codes_and_messages() {
        assert!(matches!(
            EngineError::from_command(13, "not authorized on admin"),
            EngineError::AuthRequired(_)
        ));
        assert!(matches!(
            EngineError::from_command(18, "Authentication failed."),
            EngineError::AuthRequired(_)
        ));
        // Message-only classification, no recognized code.
        assert!(matches!(
            EngineError::from_command(0, "command replSetGetStatus requires authentication"),
            EngineError::AuthRequired(_)
        ));
    }

    #[test]
    fn test_initialization_codes() {
        assert!(matches!(
            EngineError::from_command(94, "no replset config has been received"),
            EngineError::NotInitialized
        ));
        assert!(matches!(
            EngineError::from_command(23, "already initialized"),
            EngineError::AlreadyInitialized
        ));
    }

    #[test]
    fn test_set_mismatch_fragment() {
        let err = EngineError::from_command(
            103,
            "New and old configurations differ in replica set ID did not match",
        );
        assert!(matches!(err, EngineError::ReplicaSetMismatch(_)));
    }

    #[test]
    fn test_unknown_fallback() {
        assert!(matches!(
            EngineError::from_command(8000, "something odd"),
            EngineError::Unknown(_)
        ));
    }
}
