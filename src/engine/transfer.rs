//! Uploads and folder transfers over a connected share
//!
//! Everything here runs inside one share session held by the engine. The
//! folder helpers remember how many files finished so a retry on a fresh
//! connection skips them and resumes the file that was interrupted.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::AsyncReadExt;

use crate::config::EngineConfig;
use crate::core::cancel::CancelFlag;
use crate::core::path;
use crate::core::progress::{
    ByteReporter, ProgressEvent, ProgressUpdate, ProgressWindow, ScaledSink, SharedSink,
};
use crate::core::resume::TransferTask;
use crate::error::{Result, ShareError};
use crate::protocols::smb::{OpenMode, RemoteFile, SmbShare};

use super::search::classify_listing;

/// Totals of a folder transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderSummary {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Progress of a folder transfer that survives share-level retries
#[derive(Debug, Default)]
pub(crate) struct FolderState {
    started: AtomicBool,
    completed: AtomicUsize,
    bytes: AtomicU64,
}

/// Directories and files under a root, in walk order, relative to the root
#[derive(Debug, Default)]
struct FolderPlan {
    directories: Vec<String>,
    files: Vec<String>,
}

fn local_path(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(root.to_path_buf(), |acc, segment| acc.join(segment))
}

/// Stream one local file to the share, removing the partial on failure
pub(crate) async fn upload_file(
    share: &dyn SmbShare,
    local: &Path,
    remote: &str,
    cancel: &CancelFlag,
    config: &EngineConfig,
    sink: &SharedSink,
) -> Result<u64> {
    cancel.check()?;

    let mut source = match tokio::fs::File::open(local).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ShareError::NotFound(local.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let total = source.metadata().await?.len();

    let mut target = share.open_file(remote, OpenMode::Write { overwrite: true }).await?;
    let outcome = copy_to_remote(&mut source, target.as_mut(), total, cancel, config, sink).await;

    if let Err(e) = target.close().await {
        tracing::debug!(path = remote, error = %ShareError::from(e), "Close failed");
    }

    if let Err(err) = &outcome {
        tracing::info!(path = remote, error = %err, "Upload interrupted, removing partial remote file");
        if let Err(cleanup) = share.rm(remote).await {
            tracing::warn!(path = remote, error = %ShareError::from(cleanup), "Partial upload cleanup failed");
        }
    }
    outcome
}

async fn copy_to_remote(
    source: &mut tokio::fs::File,
    target: &mut dyn RemoteFile,
    total: u64,
    cancel: &CancelFlag,
    config: &EngineConfig,
    sink: &SharedSink,
) -> Result<u64> {
    let mut reporter = ByteReporter::new(sink.clone(), config.byte_throttle(), total);
    let mut buf = vec![0u8; config.chunk_size];
    let mut pos = 0u64;
    reporter.report(0);

    loop {
        cancel.check()?;

        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }

        let mut written = 0;
        while written < n {
            let w = target.write_at(&buf[written..n], pos + written as u64).await?;
            if w == 0 {
                return Err(ShareError::Transport("remote write accepted 0 bytes".to_string()));
            }
            written += w;
        }
        pos += n as u64;
        reporter.report(pos);
    }

    Ok(pos)
}

fn plan_remote<'a>(
    share: &'a dyn SmbShare,
    root: &'a str,
    relative: String,
    cancel: &'a CancelFlag,
    plan: &'a mut FolderPlan,
) -> BoxFuture<'a, Result<()>> {
    async move {
        cancel.check()?;
        let dir = path::join(root, &relative);
        let listing = classify_listing(&dir, share.list(&dir).await?);

        for entry in listing {
            cancel.check()?;
            let child = path::join(&relative, &entry.name);
            if entry.is_dir() {
                plan.directories.push(child.clone());
                plan_remote(share, root, child, cancel, plan).await?;
            } else {
                plan.files.push(child);
            }
        }
        Ok(())
    }
    .boxed()
}

fn plan_local<'a>(
    root: &'a Path,
    relative: String,
    cancel: &'a CancelFlag,
    plan: &'a mut FolderPlan,
) -> BoxFuture<'a, Result<()>> {
    async move {
        cancel.check()?;
        let dir = local_path(root, &relative);

        let mut reader = tokio::fs::read_dir(&dir).await?;
        let mut children = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let is_dir = entry.file_type().await?.is_dir();
            children.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
        }
        children.sort();

        for (name, is_dir) in children {
            cancel.check()?;
            let child = path::join(&relative, &name);
            if is_dir {
                plan.directories.push(child.clone());
                plan_local(root, child, cancel, plan).await?;
            } else {
                plan.files.push(child);
            }
        }
        Ok(())
    }
    .boxed()
}

fn file_started(sink: &SharedSink, current: usize, total: usize, name: &str) {
    sink.emit(ProgressUpdate::new(ProgressEvent::FileIndex {
        current,
        total,
        name: name.to_string(),
    }));
}

/// Mirror a remote folder into `local_root`
pub(crate) async fn download_folder(
    share: &dyn SmbShare,
    remote_root: &str,
    local_root: &Path,
    state: &FolderState,
    cancel: &CancelFlag,
    config: &EngineConfig,
    sink: &SharedSink,
) -> Result<FolderSummary> {
    let resumed = state.started.swap(true, Ordering::SeqCst);

    let mut plan = FolderPlan::default();
    plan_remote(share, remote_root, String::new(), cancel, &mut plan).await?;

    tokio::fs::create_dir_all(local_root).await?;
    for dir in &plan.directories {
        tokio::fs::create_dir_all(local_path(local_root, dir)).await?;
    }

    let total = plan.files.len();
    let done = state.completed.load(Ordering::SeqCst);

    for (index, relative) in plan.files.iter().enumerate().skip(done) {
        cancel.check()?;
        file_started(sink, index, total, relative);

        let mut task = TransferTask::new(
            path::join(remote_root, relative),
            local_path(local_root, relative),
            cancel.clone(),
        );
        if resumed && index == done {
            task = task.resuming();
        }

        let file_sink = ScaledSink::shared(sink.clone(), ProgressWindow::for_file(index, total));
        let bytes = task.download(share, config, &file_sink).await?;
        state.bytes.fetch_add(bytes, Ordering::SeqCst);
        state.completed.store(index + 1, Ordering::SeqCst);
    }

    file_started(sink, total, total, "");
    Ok(FolderSummary {
        files: total,
        directories: plan.directories.len(),
        bytes: state.bytes.load(Ordering::SeqCst),
    })
}

/// Mirror `local_root` into a remote folder, creating it if needed
pub(crate) async fn upload_folder(
    share: &dyn SmbShare,
    local_root: &Path,
    remote_root: &str,
    state: &FolderState,
    cancel: &CancelFlag,
    config: &EngineConfig,
    sink: &SharedSink,
) -> Result<FolderSummary> {
    state.started.store(true, Ordering::SeqCst);

    let mut plan = FolderPlan::default();
    match plan_local(local_root, String::new(), cancel, &mut plan).await {
        Err(ShareError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ShareError::NotFound(local_root.display().to_string()))
        }
        other => other?,
    }

    // Root and its missing ancestors first, then the tree below it
    let mut remote_dirs: Vec<String> = remote_root
        .split('/')
        .filter(|segment| !segment.is_empty())
        .scan(String::new(), |prefix, segment| {
            *prefix = path::join(prefix, segment);
            Some(prefix.clone())
        })
        .collect();
    remote_dirs.extend(plan.directories.iter().map(|d| path::join(remote_root, d)));

    for dir in &remote_dirs {
        cancel.check()?;
        if !share.folder_exists(dir).await? {
            share.mkdir(dir).await?;
        }
    }

    let total = plan.files.len();
    let done = state.completed.load(Ordering::SeqCst);

    for (index, relative) in plan.files.iter().enumerate().skip(done) {
        cancel.check()?;
        file_started(sink, index, total, relative);

        let file_sink = ScaledSink::shared(sink.clone(), ProgressWindow::for_file(index, total));
        let bytes = upload_file(
            share,
            &local_path(local_root, relative),
            &path::join(remote_root, relative),
            cancel,
            config,
            &file_sink,
        )
        .await?;
        state.bytes.fetch_add(bytes, Ordering::SeqCst);
        state.completed.store(index + 1, Ordering::SeqCst);
    }

    file_started(sink, total, total, "");
    Ok(FolderSummary {
        files: total,
        directories: plan.directories.len(),
        bytes: state.bytes.load(Ordering::SeqCst),
    })
}
