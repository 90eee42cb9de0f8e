//! Transfer Engine: share-scoped operations over one serialized session
//!
//! Every public operation goes through [`TransferEngine::with_share`]:
//!
//! 1. take the exclusive share lock (bounded wait for `search`)
//! 2. connect, authenticate and tree-connect, retrying dropped connections
//! 3. run the operation body against the share
//! 4. disconnect the share, log off and close the connection, on every path
//!
//! Engines share one process-wide [`ShareLock`], so at most one body runs at
//! a time across the process. [`TransferEngine::with_lock`] swaps in a
//! private lock.
//!
//! # Example
//!
//! ```no_run
//! use sharelink::config::EngineConfig;
//! use sharelink::engine::{MemoryCredentialStore, TransferEngine};
//! use sharelink::protocols::smb::{ConnectionDescriptor, MemoryTransport};
//! use std::sync::Arc;
//!
//! # async fn example() -> sharelink::Result<()> {
//! let transport = MemoryTransport::new();
//! transport.add_file("docs/a.txt", b"hello");
//!
//! let credentials = MemoryCredentialStore::single("nas", ConnectionDescriptor::new("nas.local", "docs"));
//! let engine = TransferEngine::new(Arc::new(transport), Arc::new(credentials), EngineConfig::default());
//!
//! for entry in engine.list("nas", "/docs").await? {
//!     println!("{} {:?}", entry.path, entry.kind);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod credentials;
pub mod search;
pub mod transfer;

pub use cache::{path_key, CacheInvalidator, Invalidation, InvalidationLog, NoopInvalidator};
pub use credentials::{CredentialStore, MemoryCredentialStore};
pub use search::{SearchRequest, SearchResults, SearchType};
pub use transfer::FolderSummary;

use std::future::Future;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::config::EngineConfig;
use crate::core::cancel::{CancelCategory, CancelFlag, CancelRegistry};
use crate::core::path;
use crate::core::pattern::NamePattern;
use crate::core::progress::SharedSink;
use crate::core::resume::TransferTask;
use crate::core::retry::{classify_share, with_retry};
use crate::error::{Result, ShareError};
use crate::protocols::smb::{ConnectionDescriptor, RemoteEntry, SmbShare, SmbTransport};

use search::Walker;
use transfer::FolderState;

/// Exclusive right to talk to a share
pub type ShareLock = Arc<Mutex<()>>;

static SHARE_LOCK: OnceLock<ShareLock> = OnceLock::new();

/// The lock every engine takes unless given its own
pub fn process_lock() -> ShareLock {
    Arc::clone(SHARE_LOCK.get_or_init(|| Arc::new(Mutex::new(()))))
}

/// A lock not shared with any other engine
pub fn isolated_lock() -> ShareLock {
    Arc::new(Mutex::new(()))
}

#[derive(Debug, Clone, Copy)]
enum LockWait {
    Blocking,
    Bounded(Duration),
}

/// Share operation engine
#[derive(Clone)]
pub struct TransferEngine {
    transport: Arc<dyn SmbTransport>,
    credentials: Arc<dyn CredentialStore>,
    cache: Arc<dyn CacheInvalidator>,
    config: Arc<EngineConfig>,
    lock: ShareLock,
    cancel: CancelRegistry,
}

impl TransferEngine {
    pub fn new(
        transport: Arc<dyn SmbTransport>,
        credentials: Arc<dyn CredentialStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            transport,
            credentials,
            cache: Arc::new(NoopInvalidator),
            config: Arc::new(config),
            lock: process_lock(),
            cancel: CancelRegistry::new(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheInvalidator>) -> Self {
        self.cache = cache;
        self
    }

    /// Replace the process-wide lock, e.g. with [`isolated_lock`]
    pub fn with_lock(mut self, lock: ShareLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn lock_handle(&self) -> ShareLock {
        Arc::clone(&self.lock)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cancel_registry(&self) -> &CancelRegistry {
        &self.cancel
    }

    /// Reset and return the flag for a new operation of `category`
    pub fn begin(&self, category: CancelCategory) -> CancelFlag {
        self.cancel.begin(category)
    }

    pub fn cancel(&self, category: CancelCategory) {
        self.cancel.cancel(category);
    }

    pub fn cancel_all(&self) {
        self.cancel.cancel_all();
    }

    /// Caller path to share-relative path
    pub fn resolve(&self, user_path: &str) -> String {
        path::path_without_share(
            user_path,
            self.config.share_path_mode,
            &self.config.known_share_names,
        )
    }

    async fn acquire(&self, operation: &str, wait: LockWait) -> Result<MutexGuard<'_, ()>> {
        match wait {
            LockWait::Blocking => Ok(self.lock.lock().await),
            LockWait::Bounded(limit) => tokio::time::timeout(limit, self.lock.lock())
                .await
                .map_err(|_| {
                    tracing::error!(operation, waited_ms = limit.as_millis() as u64, "Share lock wait timed out");
                    ShareError::LockTimeout {
                        operation: operation.to_string(),
                        waited: limit,
                    }
                }),
        }
    }

    /// Run `body` against a freshly connected share while holding the lock
    async fn with_share<T, F, Fut>(
        &self,
        connection_id: &str,
        operation: &'static str,
        target: &str,
        wait: LockWait,
        body: F,
    ) -> Result<T>
    where
        F: Fn(Arc<dyn SmbShare>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let descriptor = self.credentials.descriptor(connection_id)?;
        let _guard = self.acquire(operation, wait).await?;
        tracing::debug!(operation, path = target, endpoint = %descriptor.endpoint(), "Share lock acquired");

        let body = &body;
        let descriptor = &descriptor;
        let result = with_retry(
            &self.config.share_retry_policy(),
            target,
            |ctx| async move {
                if ctx.attempt > 0 {
                    tracing::info!(operation, path = target, attempt = ctx.ordinal(), "Reconnecting to share");
                }
                self.session(descriptor, body).await
            },
            classify_share,
        )
        .await;

        tracing::debug!(operation, path = target, ok = result.is_ok(), "Share lock released");
        result
    }

    /// connect → authenticate → tree-connect → body, then tear down in reverse
    async fn session<T, F, Fut>(&self, descriptor: &ConnectionDescriptor, body: &F) -> Result<T>
    where
        F: Fn(Arc<dyn SmbShare>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let endpoint = descriptor.endpoint();
        let mut connection = self.transport.connect(&descriptor.server, descriptor.port).await?;

        let result: Result<T> = async {
            let mut session = connection.authenticate(&descriptor.auth()).await?;

            let result: Result<T> = async {
                let share = session.connect_share(&descriptor.share).await?;
                let result = body(Arc::clone(&share)).await;
                if let Err(e) = share.disconnect().await {
                    tracing::debug!(endpoint = %endpoint, error = %ShareError::from(e), "Share disconnect failed");
                }
                result
            }
            .await;

            if let Err(e) = session.logoff().await {
                tracing::debug!(endpoint = %endpoint, error = %ShareError::from(e), "Logoff failed");
            }
            result
        }
        .await;

        if let Err(e) = connection.close().await {
            tracing::debug!(endpoint = %endpoint, error = %ShareError::from(e), "Connection close failed");
        }
        result
    }

    fn invalidate(&self, connection_id: &str, target: &str) {
        let parent = path::parent(target);
        self.cache.invalidate_path(connection_id, target);
        self.cache.invalidate_path(connection_id, &parent);
        self.cache.invalidate_search(connection_id, &parent);
    }

    /// Handshake and list the share root
    pub async fn test_connection(&self, connection_id: &str) -> Result<()> {
        self.with_share(connection_id, "test_connection", "", LockWait::Blocking, |share| async move {
            share.list("").await?;
            Ok(())
        })
        .await?;
        tracing::info!(connection = connection_id, "Connection test passed");
        Ok(())
    }

    /// Entries of a directory, without `.` and `..`
    pub async fn list(&self, connection_id: &str, dir: &str) -> Result<Vec<RemoteEntry>> {
        let dir = self.resolve(dir);
        let dir = dir.as_str();
        self.with_share(connection_id, "list", dir, LockWait::Blocking, |share| async move {
            let raw = share.list(dir).await?;
            Ok(search::classify_listing(dir, raw))
        })
        .await
    }

    /// Search, failing with a cancellation error if `cancel` is raised
    pub async fn search(
        &self,
        connection_id: &str,
        request: &SearchRequest,
        cancel: &CancelFlag,
    ) -> Result<Vec<RemoteEntry>> {
        let results = self.search_partial(connection_id, request, cancel).await?;
        if results.cancelled {
            return Err(ShareError::Cancelled(cancel.category()));
        }
        Ok(results.entries)
    }

    /// Search, returning whatever was found before a cancellation
    pub async fn search_partial(
        &self,
        connection_id: &str,
        request: &SearchRequest,
        cancel: &CancelFlag,
    ) -> Result<SearchResults> {
        cancel.check()?;
        let pattern = NamePattern::new(&request.query)?;
        let root = self.resolve(&request.path);
        let root = root.as_str();
        let pattern = &pattern;

        let results = self
            .with_share(
                connection_id,
                "search",
                root,
                LockWait::Bounded(self.config.search_lock_timeout()),
                |share| async move {
                    let walker = Walker {
                        share: share.as_ref(),
                        pattern,
                        request,
                        cancel,
                    };
                    walker.run(root).await
                },
            )
            .await?;

        tracing::info!(
            path = root,
            query = %request.query,
            matches = results.entries.len(),
            cancelled = results.cancelled,
            "Search finished"
        );
        Ok(results)
    }

    /// True if a file or folder exists at `target`
    pub async fn exists(&self, connection_id: &str, target: &str) -> Result<bool> {
        let target = self.resolve(target);
        let target = target.as_str();
        self.with_share(connection_id, "exists", target, LockWait::Blocking, |share| async move {
            if target.is_empty() {
                return Ok(true);
            }
            Ok(share.file_exists(target).await? || share.folder_exists(target).await?)
        })
        .await
    }

    pub async fn mkdir(&self, connection_id: &str, dir: &str) -> Result<()> {
        let dir = self.resolve(dir);
        let dir = dir.as_str();
        self.with_share(connection_id, "mkdir", dir, LockWait::Blocking, |share| async move {
            share.mkdir(dir).await?;
            Ok(())
        })
        .await?;
        self.invalidate(connection_id, dir);
        tracing::info!(path = dir, "Folder created");
        Ok(())
    }

    /// Remove a file, or a folder with everything below it
    pub async fn delete(&self, connection_id: &str, target: &str) -> Result<()> {
        let target = self.resolve(target);
        let target = target.as_str();
        if target.is_empty() {
            return Err(ShareError::InvalidPath("refusing to delete the share root".to_string()));
        }

        self.with_share(connection_id, "delete", target, LockWait::Blocking, |share| async move {
            if share.folder_exists(target).await? {
                share.rmdir(target, true).await?;
            } else if share.file_exists(target).await? {
                share.rm(target).await?;
            } else {
                return Err(ShareError::NotFound(target.to_string()));
            }
            Ok(())
        })
        .await?;
        self.invalidate(connection_id, target);
        tracing::info!(path = target, "Deleted");
        Ok(())
    }

    /// Rename a file or folder; fails if `to` already exists
    pub async fn rename(&self, connection_id: &str, from: &str, to: &str) -> Result<()> {
        let from = self.resolve(from);
        let to = self.resolve(to);
        let (from, to) = (from.as_str(), to.as_str());

        self.with_share(connection_id, "rename", from, LockWait::Blocking, |share| async move {
            if share.file_exists(to).await? || share.folder_exists(to).await? {
                return Err(ShareError::AlreadyExists(to.to_string()));
            }
            if !(share.file_exists(from).await? || share.folder_exists(from).await?) {
                return Err(ShareError::NotFound(from.to_string()));
            }
            share.rename(from, to).await?;
            Ok(())
        })
        .await?;
        self.invalidate(connection_id, from);
        self.invalidate(connection_id, to);
        tracing::info!(from, to, "Renamed");
        Ok(())
    }

    /// Upload one local file, replacing any remote file of the same name
    pub async fn upload(
        &self,
        connection_id: &str,
        local: &Path,
        remote: &str,
        cancel: &CancelFlag,
        sink: &SharedSink,
    ) -> Result<u64> {
        cancel.check()?;
        let remote = self.resolve(remote);
        let remote = remote.as_str();
        let config = self.config.as_ref();

        let bytes = self
            .with_share(connection_id, "upload", remote, LockWait::Blocking, |share| async move {
                transfer::upload_file(share.as_ref(), local, remote, cancel, config, sink).await
            })
            .await?;
        self.invalidate(connection_id, remote);
        tracing::info!(path = remote, bytes, "Upload complete");
        Ok(bytes)
    }

    /// Download one file, starting from scratch
    pub async fn download(
        &self,
        connection_id: &str,
        remote: &str,
        local: &Path,
        cancel: &CancelFlag,
        sink: &SharedSink,
    ) -> Result<u64> {
        let remote = self.resolve(remote);
        let task = TransferTask::new(remote, local, cancel.clone());
        self.run_download(connection_id, task, sink).await
    }

    /// Download one file, keeping an existing partial at `local`
    pub async fn resume_download(
        &self,
        connection_id: &str,
        remote: &str,
        local: &Path,
        cancel: &CancelFlag,
        sink: &SharedSink,
    ) -> Result<u64> {
        let remote = self.resolve(remote);
        let task = TransferTask::new(remote, local, cancel.clone()).resuming();
        self.run_download(connection_id, task, sink).await
    }

    async fn run_download(&self, connection_id: &str, task: TransferTask, sink: &SharedSink) -> Result<u64> {
        task.cancel_flag().check()?;
        let config = self.config.as_ref();
        let task = &task;

        let result = self
            .with_share(connection_id, "download", &task.remote, LockWait::Blocking, |share| async move {
                task.download(share.as_ref(), config, sink).await
            })
            .await;

        match &result {
            Ok(bytes) => tracing::info!(path = %task.remote, bytes, "Download complete"),
            Err(err) if err.is_cancelled() => discard_partial(&task.local).await,
            Err(_) => {}
        }
        result
    }

    /// Copy a remote folder tree into `local_root`
    pub async fn download_folder(
        &self,
        connection_id: &str,
        remote_root: &str,
        local_root: &Path,
        cancel: &CancelFlag,
        sink: &SharedSink,
    ) -> Result<FolderSummary> {
        cancel.check()?;
        let remote_root = self.resolve(remote_root);
        let remote_root = remote_root.as_str();
        let config = self.config.as_ref();
        let state = FolderState::default();
        let state = &state;

        let summary = self
            .with_share(connection_id, "download_folder", remote_root, LockWait::Blocking, |share| async move {
                transfer::download_folder(share.as_ref(), remote_root, local_root, state, cancel, config, sink).await
            })
            .await?;
        tracing::info!(path = remote_root, files = summary.files, bytes = summary.bytes, "Folder download complete");
        Ok(summary)
    }

    /// Copy a local folder tree into `remote_root`
    pub async fn upload_folder(
        &self,
        connection_id: &str,
        local_root: &Path,
        remote_root: &str,
        cancel: &CancelFlag,
        sink: &SharedSink,
    ) -> Result<FolderSummary> {
        cancel.check()?;
        let remote_root = self.resolve(remote_root);
        let remote_root = remote_root.as_str();
        let config = self.config.as_ref();
        let state = FolderState::default();
        let state = &state;

        let summary = self
            .with_share(connection_id, "upload_folder", remote_root, LockWait::Blocking, |share| async move {
                transfer::upload_folder(share.as_ref(), local_root, remote_root, state, cancel, config, sink).await
            })
            .await?;
        self.invalidate(connection_id, remote_root);
        tracing::info!(path = remote_root, files = summary.files, bytes = summary.bytes, "Folder upload complete");
        Ok(summary)
    }
}

async fn discard_partial(local: &Path) {
    match tokio::fs::remove_file(local).await {
        Ok(()) => tracing::debug!(path = %local.display(), "Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %local.display(), error = %e, "Could not remove partial download"),
    }
}
