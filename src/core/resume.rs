/*!
 * Resumable single-file downloads
 *
 * A [`TransferTask`] outlives individual attempts. The first attempt starts
 * a fresh local file (unless the task was built to resume an existing
 * partial); every later attempt, including one made on a brand new
 * connection, continues from the number of bytes already on disk.
 */

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::config::EngineConfig;
use crate::core::cancel::CancelFlag;
use crate::core::progress::{ByteReporter, SharedSink};
use crate::core::retry::{classify_transfer, with_retry};
use crate::error::{Result, ShareError};
use crate::protocols::smb::{OpenMode, RemoteFile, SmbShare};

/// One file being moved from a share to local storage
#[derive(Debug)]
pub struct TransferTask {
    pub remote: String,
    pub local: PathBuf,
    cancel: CancelFlag,
    resume_existing: bool,
    started: AtomicBool,
    resume_offset: AtomicU64,
    bytes_done: AtomicU64,
    total: AtomicU64,
}

impl TransferTask {
    pub fn new(remote: impl Into<String>, local: impl Into<PathBuf>, cancel: CancelFlag) -> Self {
        Self {
            remote: remote.into(),
            local: local.into(),
            cancel,
            resume_existing: false,
            started: AtomicBool::new(false),
            resume_offset: AtomicU64::new(0),
            bytes_done: AtomicU64::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// Keep whatever is already at `local` and continue after it
    pub fn resuming(mut self) -> Self {
        self.resume_existing = true;
        self
    }

    /// Offset the most recent attempt started from
    pub fn resume_offset(&self) -> u64 {
        self.resume_offset.load(Ordering::SeqCst)
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::SeqCst)
    }

    /// Remote size, once known
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Download with the per-file retry policy
    pub async fn download(&self, share: &dyn SmbShare, config: &EngineConfig, sink: &SharedSink) -> Result<u64> {
        with_retry(
            &config.transfer_retry_policy(),
            &self.remote,
            |ctx| async move {
                if ctx.attempt > 0 {
                    tracing::info!(
                        path = %self.remote,
                        attempt = ctx.ordinal(),
                        from = self.bytes_done(),
                        "Resuming download"
                    );
                }
                self.attempt(share, config, sink).await
            },
            classify_transfer,
        )
        .await
    }

    async fn attempt(&self, share: &dyn SmbShare, config: &EngineConfig, sink: &SharedSink) -> Result<u64> {
        self.cancel.check()?;

        let mut offset = self.prepare_local().await?;
        let mut remote = share.open_file(&self.remote, OpenMode::Read).await?;

        let outcome = async {
            let total = remote.size().await?;
            self.total.store(total, Ordering::SeqCst);

            if offset > total {
                tracing::warn!(
                    path = %self.remote,
                    local = offset,
                    remote = total,
                    "Local partial is larger than the remote file, restarting"
                );
                truncate(&self.local).await?;
                offset = 0;
            }

            self.resume_offset.store(offset, Ordering::SeqCst);
            self.copy_from(remote.as_mut(), offset, total, config, sink).await
        }
        .await;

        if let Err(e) = remote.close().await {
            tracing::debug!(path = %self.remote, error = %ShareError::from(e), "Close failed");
        }
        outcome
    }

    /// Local byte count to continue from
    async fn prepare_local(&self) -> Result<u64> {
        let first = !self.started.swap(true, Ordering::SeqCst);
        if first && !self.resume_existing {
            truncate(&self.local).await?;
            return Ok(0);
        }

        match tokio::fs::metadata(&self.local).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn copy_from(
        &self,
        remote: &mut dyn RemoteFile,
        offset: u64,
        total: u64,
        config: &EngineConfig,
        sink: &SharedSink,
    ) -> Result<u64> {
        let mut local = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.local)
            .await?;

        let mut reporter = ByteReporter::new(sink.clone(), config.byte_throttle(), total);
        let mut buf = vec![0u8; config.chunk_size];
        let mut pos = offset;

        self.bytes_done.store(pos, Ordering::SeqCst);
        reporter.report(pos);

        loop {
            self.cancel.check()?;

            let n = remote.read_at(&mut buf, pos).await?;
            if n == 0 {
                break;
            }
            local.write_all(&buf[..n]).await?;
            pos += n as u64;
            self.bytes_done.store(pos, Ordering::SeqCst);
            reporter.report(pos);
        }

        local.flush().await?;

        if pos < total {
            return Err(ShareError::Transport(format!(
                "{} ended at {} of {} bytes",
                self.remote, pos, total
            )));
        }

        tracing::debug!(path = %self.remote, bytes = pos, resumed_from = offset, "Download complete");
        Ok(pos)
    }
}

async fn truncate(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::File::create(path).await?;
    Ok(())
}
