//! Native SMB2/3 transport using the pure-Rust `smb` crate
//!
//! The crate folds connect, authenticate and tree-connect into a single
//! `share_connect` call, so the first two handles here only carry state
//! forward until the share is reached.

use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use smb::packets::fscc::{FileDispositionInformation, FileRenameInformation2};
use smb::{Client, ClientConfig, FileAccessMask, FileCreateArgs, Resource, UncPath};

use super::error::{Result, SmbError};
use super::status::map_error;
use super::types::{OpenMode, RawEntry, SmbAuth};
use super::{RemoteFile, SmbConnection, SmbSession, SmbShare, SmbTransport};

/// Transport backed by a real SMB server
#[derive(Debug, Default, Clone)]
pub struct NativeTransport;

impl NativeTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SmbTransport for NativeTransport {
    async fn connect(&self, server: &str, port: Option<u16>) -> Result<Box<dyn SmbConnection>> {
        if server.is_empty() {
            return Err(SmbError::InvalidArgument("server cannot be empty".to_string()));
        }
        if port.is_some_and(|p| p != 445) {
            tracing::warn!("Non-default SMB port {:?} ignored by native client", port);
        }

        Ok(Box::new(NativeConnection {
            server: server.to_string(),
            client: Some(Client::new(ClientConfig::default())),
        }))
    }
}

struct NativeConnection {
    server: String,
    client: Option<Client>,
}

fn take_client(client: &mut Option<Client>, server: &str) -> Result<Client> {
    client.take().ok_or_else(|| SmbError::Connection {
        endpoint: server.to_string(),
        message: "connection already consumed".to_string(),
    })
}

#[async_trait]
impl SmbConnection for NativeConnection {
    async fn authenticate(&mut self, auth: &SmbAuth) -> Result<Box<dyn SmbSession>> {
        let (username, password) = match auth {
            SmbAuth::Guest => (String::new(), String::new()),
            SmbAuth::Ntlm { username, password, domain } => {
                let user = match domain {
                    Some(domain) if !domain.is_empty() => format!("{}\\{}", domain, username),
                    _ => username.clone(),
                };
                (user, password.expose().to_string())
            }
        };

        Ok(Box::new(NativeSession {
            server: self.server.clone(),
            client: Some(take_client(&mut self.client, &self.server)?),
            username,
            password: super::types::Secret(password),
        }))
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the client tears the socket down
        self.client = None;
        Ok(())
    }
}

struct NativeSession {
    server: String,
    client: Option<Client>,
    username: String,
    password: super::types::Secret,
}

#[async_trait]
impl SmbSession for NativeSession {
    async fn connect_share(&mut self, name: &str) -> Result<Arc<dyn SmbShare>> {
        if name.is_empty() {
            return Err(SmbError::InvalidArgument("share cannot be empty".to_string()));
        }

        let unc = format!(r"\\{}\{}", self.server, name);
        let unc_path = UncPath::from_str(&unc).map_err(|_| SmbError::InvalidArgument(unc.clone()))?;

        let client = take_client(&mut self.client, &self.server)?;
        client
            .share_connect(&unc_path, self.username.as_str(), self.password.expose().to_string())
            .await
            .map_err(|e| {
                tracing::error!("SMB connection to {} failed: {:?}", unc, e);
                map_error(&unc, "", e)
            })?;

        tracing::info!("Connected to {}", unc);
        Ok(Arc::new(NativeShare {
            root: unc,
            client: Arc::new(client),
        }))
    }

    async fn logoff(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }
}

struct NativeShare {
    root: String,
    client: Arc<Client>,
}

impl NativeShare {
    fn unc(&self, rel: &str) -> Result<UncPath> {
        let rel = rel.trim_matches(['/', '\\']).replace('/', "\\");
        let full = if rel.is_empty() {
            self.root.clone()
        } else {
            format!(r"{}\{}", self.root, rel)
        };
        UncPath::from_str(&full).map_err(|_| SmbError::InvalidArgument(full))
    }

    async fn open(&self, rel: &str, args: &FileCreateArgs) -> Result<Resource> {
        let unc = self.unc(rel)?;
        self.client.create_file(&unc, args).await.map_err(|e| {
            tracing::debug!("create_file {} failed: {:?}", rel, e);
            map_error(&self.root, rel, e)
        })
    }

    async fn open_existing(&self, rel: &str) -> Result<Resource> {
        let args = FileCreateArgs::make_open_existing(FileAccessMask::new().with_generic_read(true));
        self.open(rel, &args).await
    }

    async fn open_for_delete(&self, rel: &str) -> Result<Resource> {
        let args = FileCreateArgs::make_open_existing(FileAccessMask::new().with_delete(true));
        self.open(rel, &args).await
    }

    async fn close(resource: Resource) {
        match resource {
            Resource::File(f) => f.close().await.ok(),
            Resource::Directory(d) => d.close().await.ok(),
            Resource::Pipe(p) => p.close().await.ok(),
        };
    }

    /// Mark an open handle delete-pending; the server removes it on close
    async fn delete_on_close(&self, rel: &str, resource: Resource) -> Result<()> {
        let info = FileDispositionInformation {
            delete_pending: true.into(),
        };
        let outcome = match &resource {
            Resource::File(f) => f.set_file_info(info).await,
            Resource::Directory(d) => d.set_file_info(info).await,
            Resource::Pipe(_) => {
                Self::close(resource).await;
                return Err(SmbError::InvalidArgument(format!("{} is a pipe", rel)));
            }
        };
        Self::close(resource).await;
        outcome.map_err(|e| map_error(&self.root, rel, e))
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<RawEntry>> {
        let dir = match self.open_existing(path).await? {
            Resource::Directory(d) => d,
            other => {
                Self::close(other).await;
                return Err(SmbError::InvalidArgument(format!("{} is not a directory", path)));
            }
        };

        let listed = dir.list().await;
        dir.close().await.ok();
        let listed = listed.map_err(|e| {
            tracing::error!("Failed to list {}: {:?}", path, e);
            map_error(&self.root, path, e)
        })?;

        Ok(listed
            .into_iter()
            .map(|entry| {
                let is_directory = entry.file_attributes.directory();
                RawEntry {
                    name: entry.file_name.to_string(),
                    is_directory,
                    size: if is_directory { 0 } else { entry.end_of_file },
                    modified: from_file_time(u64::from(entry.last_write_time)),
                }
            })
            .collect())
    }
}

/// Seconds between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_OFFSET_SECS: u64 = 11_644_473_600;

/// FILETIME (100ns ticks since 1601) to wall-clock time; zero means unset
fn from_file_time(ticks: u64) -> Option<SystemTime> {
    if ticks == 0 {
        return None;
    }
    let since_1601 = Duration::from_nanos(ticks.saturating_mul(100));
    let since_unix = since_1601.checked_sub(Duration::from_secs(FILETIME_UNIX_OFFSET_SECS))?;
    SystemTime::UNIX_EPOCH.checked_add(since_unix)
}

fn child_path(base: &str, name: &str) -> String {
    let base = base.trim_matches(['/', '\\']);
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base, name)
    }
}

#[async_trait]
impl SmbShare for NativeShare {
    async fn list(&self, path: &str) -> Result<Vec<RawEntry>> {
        self.list_dir(path).await
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        match self.open_existing(path).await {
            Ok(resource) => {
                let is_file = matches!(resource, Resource::File(_));
                Self::close(resource).await;
                Ok(is_file)
            }
            Err(SmbError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn folder_exists(&self, path: &str) -> Result<bool> {
        match self.open_existing(path).await {
            Ok(resource) => {
                let is_dir = matches!(resource, Resource::Directory(_));
                Self::close(resource).await;
                Ok(is_dir)
            }
            Err(SmbError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let resource = self.open(path, &FileCreateArgs::make_create_directory()).await?;
        Self::close(resource).await;
        Ok(())
    }

    async fn rm(&self, path: &str) -> Result<()> {
        match self.open_for_delete(path).await? {
            Resource::Directory(d) => {
                d.close().await.ok();
                Err(SmbError::InvalidArgument(format!("{} is a directory", path)))
            }
            resource => self.delete_on_close(path, resource).await,
        }
    }

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<()> {
        // Directories in discovery order; removed deepest first
        let mut dirs = vec![path.to_string()];
        if recursive {
            let mut next = 0;
            while next < dirs.len() {
                let dir = dirs[next].clone();
                next += 1;
                for entry in self.list_dir(&dir).await? {
                    if entry.name == "." || entry.name == ".." {
                        continue;
                    }
                    let child = child_path(&dir, &entry.name);
                    if entry.is_directory {
                        dirs.push(child);
                    } else {
                        self.rm(&child).await?;
                    }
                }
            }
        }

        for dir in dirs.iter().rev() {
            let resource = self.open_for_delete(dir).await?;
            self.delete_on_close(dir, resource).await?;
        }
        Ok(())
    }

    async fn open_file(&self, path: &str, mode: OpenMode) -> Result<Box<dyn RemoteFile>> {
        let resource = match mode {
            OpenMode::Read => self.open_existing(path).await?,
            OpenMode::Write { overwrite } => {
                if !overwrite && self.file_exists(path).await? {
                    return Err(SmbError::AlreadyExists(path.to_string()));
                }
                let args =
                    FileCreateArgs::make_create_always(FileAccessMask::new().with_generic_write(true));
                self.open(path, &args).await?
            }
        };

        match resource {
            Resource::File(file) => Ok(Box::new(NativeFile {
                file,
                root: self.root.clone(),
                path: path.to_string(),
            })),
            other => {
                Self::close(other).await;
                Err(SmbError::InvalidArgument(format!("{} is not a file", path)))
            }
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let info = FileRenameInformation2 {
            replace_if_exists: false.into(),
            root_directory: 0,
            file_name: to.trim_matches('/').replace('/', "\\").into(),
        };
        let resource = self.open_for_delete(from).await?;
        let outcome = match &resource {
            Resource::File(f) => f.set_file_info(info).await,
            Resource::Directory(d) => d.set_file_info(info).await,
            Resource::Pipe(_) => {
                Self::close(resource).await;
                return Err(SmbError::InvalidArgument(format!("{} is a pipe", from)));
            }
        };
        Self::close(resource).await;
        outcome.map_err(|e| map_error(&self.root, to, e))
    }

    async fn disconnect(&self) -> Result<()> {
        tracing::info!("Disconnecting from {}", self.root);
        Ok(())
    }
}

struct NativeFile {
    file: smb::File,
    root: String,
    path: String,
}

impl NativeFile {
    fn failed(&self, op: &str, e: impl std::fmt::Debug) -> SmbError {
        tracing::debug!("SMB {} on {} failed: {:?}", op, self.path, e);
        map_error(&self.root, &self.path, e)
    }
}

#[async_trait]
impl RemoteFile for NativeFile {
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.file
            .read_at(buf, offset)
            .await
            .map_err(|e| self.failed("read", e))
    }

    async fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.file
            .write_at(buf, offset)
            .await
            .map_err(|e| self.failed("write", e))
    }

    async fn size(&mut self) -> Result<u64> {
        self.file
            .get_len()
            .await
            .map_err(|e| self.failed("query size", e))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.file.close().await.ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_server_rejected() {
        let transport = NativeTransport::new();
        assert!(matches!(
            transport.connect("", None).await,
            Err(SmbError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_guest_session_carries_empty_credentials() {
        let transport = NativeTransport::new();
        let mut conn = transport.connect("nas", None).await.unwrap();
        assert!(conn.authenticate(&SmbAuth::Guest).await.is_ok());
        // The client moves into the first session
        assert!(conn.authenticate(&SmbAuth::Guest).await.is_err());
    }

    #[test]
    fn test_file_time_conversion() {
        assert_eq!(from_file_time(0), None);
        let epoch_ticks = FILETIME_UNIX_OFFSET_SECS * 10_000_000;
        assert_eq!(from_file_time(epoch_ticks), Some(SystemTime::UNIX_EPOCH));
        assert_eq!(
            from_file_time(epoch_ticks + 15_000_000),
            Some(SystemTime::UNIX_EPOCH + Duration::from_millis(1500))
        );
        // Before 1970
        assert_eq!(from_file_time(1), None);
    }

    #[test]
    fn test_child_path() {
        assert_eq!(child_path("", "a.txt"), "a.txt");
        assert_eq!(child_path("/photos/", "a.txt"), "photos/a.txt");
    }
}
