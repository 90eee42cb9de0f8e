/*!
 * Error types for Sharelink
 */

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::core::cancel::CancelCategory;

pub type Result<T> = std::result::Result<T, ShareError>;

/// Marker carried by every cancellation message
pub const CANCELLED_MARKER: &str = "cancelled by user";

/// Message fragments that identify a dropped or interrupted connection
const BACKGROUND_SIGNATURES: &[&str] = &[
    "socket",
    "connection reset",
    "broken pipe",
    "transport",
    "connection aborted",
    "connection closed",
    "software caused connection abort",
    "not connected",
    "econnreset",
    "epipe",
];

#[derive(Error, Debug)]
pub enum ShareError {
    /// Could not reach or keep the connection to the server
    #[error("connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    /// Failure raised by the SMB transport library
    #[error("transport error: {0}")]
    Transport(String),

    /// Local or remote I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Authentication rejected by the server
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Access denied on a share or path
    #[error("access denied: {0}")]
    PermissionDenied(String),

    /// File or directory missing
    #[error("not found: {0}")]
    NotFound(String),

    /// Target of a create/rename already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Cooperative cancellation observed
    #[error("{0} cancelled by user")]
    Cancelled(CancelCategory),

    /// The exclusive share lock could not be obtained in time
    #[error("{operation} timed out after {}ms waiting for the share lock (possible deadlock)", .waited.as_millis())]
    LockTimeout { operation: String, waited: Duration },

    /// Transient failures persisted through every allowed attempt
    #[error("{path} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        path: String,
        attempts: u32,
        #[source]
        last: Box<ShareError>,
    },

    /// Transport-level timeout
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Path could not be interpreted
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Caller supplied an unusable argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not available on this transport
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The worker host could not accept work
    #[error("worker host unavailable: {0}")]
    HostUnavailable(String),

    /// Allocation failure reported by the transport
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Diagnostic severity. Never used for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connectivity and transport failures
    Network,
    /// Authentication/authorization errors
    Security,
    /// Missing files or directories
    NotFound,
    /// Create/rename target collisions
    Conflict,
    /// User-initiated cancellation
    Cancellation,
    /// Lock and transport timeouts
    Timeout,
    /// Retry exhaustion
    Retry,
    /// Local I/O errors
    IoError,
    /// Path or argument validation errors
    Validation,
    /// Worker host lifecycle problems
    Host,
    /// Resource exhaustion
    Resource,
    /// Configuration errors
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Security => write!(f, "security"),
            ErrorCategory::NotFound => write!(f, "not_found"),
            ErrorCategory::Conflict => write!(f, "conflict"),
            ErrorCategory::Cancellation => write!(f, "cancellation"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Retry => write!(f, "retry"),
            ErrorCategory::IoError => write!(f, "io"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Host => write!(f, "host"),
            ErrorCategory::Resource => write!(f, "resource"),
            ErrorCategory::Configuration => write!(f, "configuration"),
        }
    }
}

impl ShareError {
    pub fn connection(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        ShareError::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// True when the failure looks like a dropped connection
    ///
    /// These are the only failures the share-level retry repeats, and the
    /// ones that make the per-file retry give up so a fresh connection can be
    /// built one level up.
    pub fn is_background_related(&self) -> bool {
        match self {
            ShareError::Connection { .. } | ShareError::Timeout(_) => true,
            ShareError::Io(err) => Self::is_io_background_related(err),
            ShareError::Transport(message) => Self::has_background_signature(message),
            _ => false,
        }
    }

    fn is_io_background_related(err: &io::Error) -> bool {
        use io::ErrorKind::*;
        matches!(
            err.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | UnexpectedEof
        ) || Self::has_background_signature(&err.to_string())
    }

    fn has_background_signature(message: &str) -> bool {
        let lower = message.to_ascii_lowercase();
        BACKGROUND_SIGNATURES.iter().any(|sig| lower.contains(sig))
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            ShareError::Cancelled(_) => true,
            ShareError::RetriesExhausted { last, .. } => last.is_cancelled(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ShareError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ShareError::AlreadyExists(_))
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, ShareError::LockTimeout { .. })
    }

    /// Severity used when logging the failure
    pub fn severity(&self) -> Severity {
        match self {
            ShareError::OutOfMemory(_) => Severity::Critical,
            ShareError::Auth(_) | ShareError::PermissionDenied(_) => Severity::High,
            ShareError::Io(err) if err.kind() == io::ErrorKind::PermissionDenied => Severity::High,
            ShareError::Io(err) if err.kind() == io::ErrorKind::ConnectionRefused => Severity::High,
            ShareError::Io(err) if err.kind() == io::ErrorKind::OutOfMemory => Severity::Critical,
            ShareError::Connection { message, .. } | ShareError::Transport(message)
                if message.to_ascii_lowercase().contains("refused") =>
            {
                Severity::High
            }
            ShareError::RetriesExhausted { last, .. } => last.severity(),
            _ => Severity::Medium,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            ShareError::Connection { .. } | ShareError::Transport(_) => ErrorCategory::Network,
            ShareError::Io(err) if Self::is_io_background_related(err) => ErrorCategory::Network,
            ShareError::Io(_) => ErrorCategory::IoError,
            ShareError::Auth(_) | ShareError::PermissionDenied(_) => ErrorCategory::Security,
            ShareError::NotFound(_) => ErrorCategory::NotFound,
            ShareError::AlreadyExists(_) => ErrorCategory::Conflict,
            ShareError::Cancelled(_) => ErrorCategory::Cancellation,
            ShareError::LockTimeout { .. } | ShareError::Timeout(_) => ErrorCategory::Timeout,
            ShareError::RetriesExhausted { .. } => ErrorCategory::Retry,
            ShareError::InvalidPath(_)
            | ShareError::InvalidArgument(_)
            | ShareError::Unsupported(_) => ErrorCategory::Validation,
            ShareError::HostUnavailable(_) => ErrorCategory::Host,
            ShareError::OutOfMemory(_) => ErrorCategory::Resource,
            ShareError::Config(_) => ErrorCategory::Configuration,
        }
    }
}

impl From<toml::de::Error> for ShareError {
    fn from(err: toml::de::Error) -> Self {
        ShareError::Config(format!("TOML parse error: {}", err))
    }
}

impl From<toml::ser::Error> for ShareError {
    fn from(err: toml::ser::Error) -> Self {
        ShareError::Config(format!("TOML serialize error: {}", err))
    }
}
