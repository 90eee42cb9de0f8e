//! SMB transport error types

use thiserror::Error;

use crate::error::ShareError;

/// Errors raised by an SMB transport
///
/// The engine converts these into [`ShareError`] and classifies them there.
#[derive(Error, Debug)]
pub enum SmbError {
    /// Authentication failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Permission denied
    #[error("permission denied: {0}")]
    Permission(String),

    /// Path not found
    #[error("path not found: {0}")]
    NotFound(String),

    /// Object name collision
    #[error("object name collision: {0}")]
    AlreadyExists(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// Unsupported feature or operation
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// Connection error
    #[error("connection error ({endpoint}): {message}")]
    Connection { endpoint: String, message: String },

    /// Invalid path or argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Allocation failure
    #[error("out of memory: {0}")]
    OutOfMemory(String),
}

/// Result type for SMB operations
pub type Result<T> = std::result::Result<T, SmbError>;

impl SmbError {
    /// Check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, SmbError::NotFound(_))
    }
}

impl From<SmbError> for ShareError {
    fn from(err: SmbError) -> Self {
        match err {
            SmbError::Auth(msg) => ShareError::Auth(msg),
            SmbError::Permission(msg) => ShareError::PermissionDenied(msg),
            SmbError::NotFound(path) => ShareError::NotFound(path),
            SmbError::AlreadyExists(path) => ShareError::AlreadyExists(path),
            SmbError::Io(err) => ShareError::Io(err),
            SmbError::Protocol(msg) => ShareError::Transport(msg),
            SmbError::Timeout(msg) => ShareError::Timeout(msg),
            SmbError::Unsupported(what) => ShareError::Unsupported(what),
            SmbError::Connection { endpoint, message } => ShareError::Connection { endpoint, message },
            SmbError::InvalidArgument(msg) => ShareError::InvalidArgument(msg),
            SmbError::OutOfMemory(msg) => ShareError::OutOfMemory(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SmbError::NotFound("/path/to/file".to_string());
        assert_eq!(err.to_string(), "path not found: /path/to/file");

        let err = SmbError::Connection {
            endpoint: "nas".to_string(),
            message: "refused".to_string(),
        };
        assert_eq!(err.to_string(), "connection error (nas): refused");
    }

    #[test]
    fn test_conversion_preserves_kind() {
        let share: ShareError = SmbError::NotFound("a.txt".to_string()).into();
        assert!(share.is_not_found());

        let share: ShareError = SmbError::AlreadyExists("b.txt".to_string()).into();
        assert!(share.is_conflict());

        let share: ShareError = SmbError::Connection {
            endpoint: "nas".to_string(),
            message: "reset".to_string(),
        }
        .into();
        assert!(share.is_background_related());

        let share: ShareError = SmbError::Protocol("STATUS_INVALID_PARAMETER".to_string()).into();
        assert!(!share.is_background_related());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let smb_err: SmbError = io_err.into();
        assert!(matches!(smb_err, SmbError::Io(_)));

        let share: ShareError = smb_err.into();
        assert!(share.is_background_related());
    }
}
