//! SMB2/3 transport contract
//!
//! The engine never speaks the wire protocol itself. It drives a transport
//! through four handles that mirror the protocol's own layering:
//!
//! ```text
//! SmbTransport ──connect──▶ SmbConnection ──authenticate──▶ SmbSession
//!                                                             │
//!                                               connect_share ▼
//!                                   RemoteFile ◀──open_file── SmbShare
//! ```
//!
//! Every call may fail with an [`SmbError`]; classification into transient
//! and permanent failures happens in the engine.
//!
//! Two transports ship with the crate: [`MemoryTransport`], an in-process
//! share with fault injection, and (behind the `smb-native` feature) an
//! adapter over the pure-Rust `smb` crate.

pub mod error;
pub mod memory;
pub mod status;
pub mod types;

#[cfg(feature = "smb-native")]
pub mod native;

pub use error::*;
pub use memory::{Fault, MemoryTransport, TransportCall};
pub use types::*;

#[cfg(feature = "smb-native")]
pub use native::NativeTransport;

use async_trait::async_trait;
use std::sync::Arc;

/// Entry point of an SMB client library
#[async_trait]
pub trait SmbTransport: Send + Sync {
    /// Open a TCP/NetBIOS connection to `server`
    async fn connect(&self, server: &str, port: Option<u16>) -> Result<Box<dyn SmbConnection>>;
}

/// An open, unauthenticated connection
#[async_trait]
pub trait SmbConnection: Send + Sync {
    /// Negotiate a session. [`SmbAuth::Guest`] requests a guest session.
    async fn authenticate(&mut self, auth: &SmbAuth) -> Result<Box<dyn SmbSession>>;

    async fn close(&mut self) -> Result<()>;
}

/// An authenticated session
#[async_trait]
pub trait SmbSession: Send + Sync {
    /// Tree-connect to a named share
    async fn connect_share(&mut self, name: &str) -> Result<Arc<dyn SmbShare>>;

    async fn logoff(&mut self) -> Result<()>;
}

/// A connected share. Paths are share-relative with `/` separators; the empty
/// string is the share root.
///
/// Both shipped transports implement every method. A transport over a client
/// library without delete or rename support answers `rm`, `rmdir` and
/// `rename` with [`SmbError::Unsupported`], which the engine reports to the
/// caller without retrying.
#[async_trait]
pub trait SmbShare: Send + Sync {
    /// Raw directory listing. May include `.` and `..`.
    async fn list(&self, path: &str) -> Result<Vec<RawEntry>>;

    async fn file_exists(&self, path: &str) -> Result<bool>;

    async fn folder_exists(&self, path: &str) -> Result<bool>;

    async fn mkdir(&self, path: &str) -> Result<()>;

    async fn rm(&self, path: &str) -> Result<()>;

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<()>;

    async fn open_file(&self, path: &str, mode: OpenMode) -> Result<Box<dyn RemoteFile>>;

    /// Rename a file or a directory through its open handle
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// An open remote file handle
#[async_trait]
pub trait RemoteFile: Send {
    /// Read into `buf` starting at `offset`. Returns 0 at end of file.
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize>;

    async fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize>;

    /// Current size of the file in bytes
    async fn size(&mut self) -> Result<u64>;

    async fn close(self: Box<Self>) -> Result<()>;
}
