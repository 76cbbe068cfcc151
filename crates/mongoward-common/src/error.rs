//! Error types for mongoward
//!
//! `MongowardError` is the application-level error enum shared by the
//! controller crates. Engine/driver errors have their own taxonomy in
//! `mongoward-engine` and are stringified at this boundary.

/// Application-level error types
#[derive(thiserror::Error, Debug)]
pub enum MongowardError {
    #[error("registry error: {0}")]
    Registry(String),

    #[error("identity resolution failed: {0}")]
    Identity(String),

    #[error("hosts file error: {0}")]
    HostsFile(String),

    #[error("peer rpc error: {0}")]
    Peer(String),

    #[error("engine error: {0}")]
    Engine(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MongowardError::Registry("status 503".to_string());
        assert_eq!(format!("{}", err), "registry error: status 503");

        let err = MongowardError::Identity("no usable address".to_string());
        assert_eq!(
            format!("{}", err),
            "identity resolution failed: no usable address"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: MongowardError = io.into();
        assert!(matches!(err, MongowardError::Io(_)));
    }
}
