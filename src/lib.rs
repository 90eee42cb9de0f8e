/*!
 * Sharelink - background-safe SMB share operations
 *
 * A share operation engine with:
 * - One serialized session per share operation, torn down on every path
 * - Classified retry of dropped connections with linear backoff
 * - Resumable chunked downloads and folder transfers
 * - Cooperative, category-scoped cancellation
 * - Throttled, nestable progress reporting
 * - A dispatcher that queues named operations until a worker host is ready
 *
 * Version: 0.4.0
 */

pub mod config;
pub mod core;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod logging;
pub mod protocols;

// Re-export commonly used types
pub use config::{EngineConfig, LogLevel, SharePathMode};
pub use core::{CancelCategory, CancelFlag, CancelRegistry, NamePattern, ProgressSink, ProgressUpdate, SharedSink};
pub use dispatcher::{LocalWorkerHost, OperationDispatcher, OperationState, OperationTicket, WorkerHost};
pub use engine::{CredentialStore, MemoryCredentialStore, SearchRequest, SearchType, TransferEngine};
pub use error::{Result, ShareError};
pub use protocols::smb::{ConnectionDescriptor, EntryKind, RemoteEntry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
