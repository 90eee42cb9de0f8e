//! In-memory SMB transport
//!
//! A single shared tree of files and directories behind a mutex, reachable
//! through the same connection/session/share handles as a real server.
//! Tests and demos use it to drive the engine without a network, and to
//! inject faults into individual transport calls.
//!
//! # Example
//!
//! ```rust
//! use sharelink::protocols::smb::{Fault, MemoryTransport, TransportCall};
//!
//! let transport = MemoryTransport::new();
//! transport.add_file("docs/a.txt", b"hello");
//! transport.add_dir("docs/archive");
//! transport.fail_next(TransportCall::Connect, Fault::ConnectionReset);
//! assert!(transport.exists("docs"));
//! ```

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use super::error::{Result, SmbError};
use super::types::{OpenMode, RawEntry, SmbAuth};
use super::{RemoteFile, SmbConnection, SmbSession, SmbShare, SmbTransport};

/// Transport operations that can be counted and faulted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportCall {
    Connect,
    Authenticate,
    ConnectShare,
    List,
    Exists,
    Mkdir,
    Rm,
    Rmdir,
    Open,
    Read,
    Write,
    Rename,
}

/// A failure to inject
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    ConnectionReset,
    BrokenPipe,
    Timeout,
    AccessDenied,
    LogonFailure,
    /// Non-transient protocol status
    Protocol(String),
    InvalidArgument(String),
}

impl Fault {
    fn to_error(&self, endpoint: &str) -> SmbError {
        match self {
            Fault::ConnectionReset => SmbError::Connection {
                endpoint: endpoint.to_string(),
                message: "connection reset by peer".to_string(),
            },
            Fault::BrokenPipe => SmbError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            )),
            Fault::Timeout => SmbError::Timeout(format!("{} did not respond", endpoint)),
            Fault::AccessDenied => SmbError::Permission("STATUS_ACCESS_DENIED".to_string()),
            Fault::LogonFailure => SmbError::Auth("STATUS_LOGON_FAILURE".to_string()),
            Fault::Protocol(status) => SmbError::Protocol(status.clone()),
            Fault::InvalidArgument(msg) => SmbError::InvalidArgument(msg.clone()),
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
    is_dir: bool,
    modified: SystemTime,
}

impl Node {
    fn file(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            is_dir: false,
            modified: SystemTime::now(),
        }
    }

    fn dir() -> Self {
        Self {
            data: Vec::new(),
            is_dir: true,
            modified: SystemTime::now(),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    nodes: BTreeMap<String, Node>,
    calls: HashMap<TransportCall, u64>,
    faults: HashMap<TransportCall, VecDeque<Fault>>,
    list_faults: HashMap<String, Fault>,
    read_faults: HashMap<String, (u64, Fault)>,
    read_log: Vec<(String, u64)>,
    credentials: Option<(String, String)>,
    active_connections: usize,
    max_active_connections: usize,
    latency: Duration,
}

/// Shared in-memory share tree. Cheap to clone; clones see the same tree.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(ix) => &path[..ix],
        None => "",
    }
}

fn is_descendant(candidate: &str, ancestor: &str) -> bool {
    candidate.len() > ancestor.len()
        && candidate.starts_with(ancestor)
        && candidate.as_bytes()[ancestor.len()] == b'/'
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryTransport {
    /// Create an empty share tree
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        lock(&self.state)
    }

    /// Add a file, creating missing parent directories
    pub fn add_file(&self, path: &str, data: &[u8]) {
        let path = normalize(path);
        let mut state = self.state();
        Self::ensure_parents(&mut state, &path);
        state.nodes.insert(path, Node::file(data));
    }

    /// Add a directory, creating missing parents
    pub fn add_dir(&self, path: &str) {
        let path = normalize(path);
        let mut state = self.state();
        Self::ensure_parents(&mut state, &path);
        state.nodes.insert(path, Node::dir());
    }

    fn ensure_parents(state: &mut MemoryState, path: &str) {
        let mut parent = parent_of(path);
        while !parent.is_empty() {
            state
                .nodes
                .entry(parent.to_string())
                .or_insert_with(Node::dir);
            parent = parent_of(parent);
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        let path = normalize(path);
        path.is_empty() || self.state().nodes.contains_key(&path)
    }

    /// Contents of a file, if present
    pub fn file_data(&self, path: &str) -> Option<Vec<u8>> {
        self.state()
            .nodes
            .get(&normalize(path))
            .filter(|node| !node.is_dir)
            .map(|node| node.data.clone())
    }

    /// Require these credentials; guest sessions are rejected afterwards
    pub fn require_credentials(&self, username: &str, password: &str) {
        self.state().credentials = Some((username.to_string(), password.to_string()));
    }

    /// Delay applied to every listing and read
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Fail the next call of this kind
    pub fn fail_next(&self, call: TransportCall, fault: Fault) {
        self.fail_next_n(call, 1, fault);
    }

    /// Fail the next `n` calls of this kind
    pub fn fail_next_n(&self, call: TransportCall, n: usize, fault: Fault) {
        let mut state = self.state();
        let queue = state.faults.entry(call).or_default();
        for _ in 0..n {
            queue.push_back(fault.clone());
        }
    }

    /// Fail every listing of `path`
    pub fn fail_list_at(&self, path: &str, fault: Fault) {
        self.state().list_faults.insert(normalize(path), fault);
    }

    /// Fail the first read of `path` that starts at or beyond `offset`
    pub fn fail_read_at(&self, path: &str, offset: u64, fault: Fault) {
        self.state()
            .read_faults
            .insert(normalize(path), (offset, fault));
    }

    /// Number of times a call kind was attempted
    pub fn call_count(&self, call: TransportCall) -> u64 {
        self.state().calls.get(&call).copied().unwrap_or(0)
    }

    /// Total transport calls of every kind
    pub fn total_calls(&self) -> u64 {
        self.state().calls.values().sum()
    }

    /// Offsets of every `read_at` issued against `path`, in order
    pub fn read_offsets(&self, path: &str) -> Vec<u64> {
        let path = normalize(path);
        self.state()
            .read_log
            .iter()
            .filter(|(p, _)| *p == path)
            .map(|(_, offset)| *offset)
            .collect()
    }

    /// Highest number of connections that were open at the same time
    pub fn max_concurrent_connections(&self) -> usize {
        self.state().max_active_connections
    }

    /// Connections currently open
    pub fn active_connections(&self) -> usize {
        self.state().active_connections
    }
}

/// Count the call and pop a queued fault for it
fn check(state: &Mutex<MemoryState>, call: TransportCall, endpoint: &str) -> Result<()> {
    let mut state = lock(state);
    *state.calls.entry(call).or_insert(0) += 1;
    if let Some(fault) = state.faults.get_mut(&call).and_then(|queue| queue.pop_front()) {
        return Err(fault.to_error(endpoint));
    }
    Ok(())
}

fn latency(state: &Mutex<MemoryState>) -> Duration {
    lock(state).latency
}

#[async_trait]
impl SmbTransport for MemoryTransport {
    async fn connect(&self, server: &str, _port: Option<u16>) -> Result<Box<dyn SmbConnection>> {
        check(&self.state, TransportCall::Connect, server)?;

        {
            let mut state = self.state();
            state.active_connections += 1;
            state.max_active_connections = state.max_active_connections.max(state.active_connections);
        }

        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
            endpoint: server.to_string(),
            open: true,
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
    endpoint: String,
    open: bool,
}

impl MemoryConnection {
    fn release(&mut self) {
        if self.open {
            self.open = false;
            let mut state = lock(&self.state);
            state.active_connections = state.active_connections.saturating_sub(1);
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl SmbConnection for MemoryConnection {
    async fn authenticate(&mut self, auth: &SmbAuth) -> Result<Box<dyn SmbSession>> {
        check(&self.state, TransportCall::Authenticate, &self.endpoint)?;

        let required = lock(&self.state).credentials.clone();
        if let Some((user, pass)) = required {
            let accepted = match auth {
                SmbAuth::Guest => false,
                SmbAuth::Ntlm { username, password, .. } => {
                    *username == user && password.expose() == pass
                }
            };
            if !accepted {
                return Err(SmbError::Auth("STATUS_LOGON_FAILURE".to_string()));
            }
        }

        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
            endpoint: self.endpoint.clone(),
        }))
    }

    async fn close(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

struct MemorySession {
    state: Arc<Mutex<MemoryState>>,
    endpoint: String,
}

#[async_trait]
impl SmbSession for MemorySession {
    async fn connect_share(&mut self, name: &str) -> Result<Arc<dyn SmbShare>> {
        check(&self.state, TransportCall::ConnectShare, &self.endpoint)?;
        if name.is_empty() {
            return Err(SmbError::InvalidArgument("share name cannot be empty".to_string()));
        }

        Ok(Arc::new(MemoryShare {
            state: Arc::clone(&self.state),
            endpoint: self.endpoint.clone(),
            connected: AtomicBool::new(true),
        }))
    }

    async fn logoff(&mut self) -> Result<()> {
        Ok(())
    }
}

struct MemoryShare {
    state: Arc<Mutex<MemoryState>>,
    endpoint: String,
    connected: AtomicBool,
}

impl MemoryShare {
    fn check(&self, call: TransportCall) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SmbError::Connection {
                endpoint: self.endpoint.clone(),
                message: "share not connected".to_string(),
            });
        }
        check(&self.state, call, &self.endpoint)
    }

    fn is_dir(state: &MemoryState, path: &str) -> bool {
        path.is_empty() || state.nodes.get(path).map(|n| n.is_dir).unwrap_or(false)
    }
}

#[async_trait]
impl SmbShare for MemoryShare {
    async fn list(&self, path: &str) -> Result<Vec<RawEntry>> {
        self.check(TransportCall::List)?;
        let delay = latency(&self.state);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let path = normalize(path);
        let state = lock(&self.state);

        if let Some(fault) = state.list_faults.get(&path) {
            return Err(fault.to_error(&self.endpoint));
        }
        if !Self::is_dir(&state, &path) {
            return match state.nodes.get(&path) {
                Some(_) => Err(SmbError::InvalidArgument(format!("{} is not a directory", path))),
                None => Err(SmbError::NotFound(path)),
            };
        }

        let now = SystemTime::now();
        let mut entries = vec![
            RawEntry {
                name: ".".to_string(),
                is_directory: true,
                size: 0,
                modified: Some(now),
            },
            RawEntry {
                name: "..".to_string(),
                is_directory: true,
                size: 0,
                modified: Some(now),
            },
        ];

        entries.extend(
            state
                .nodes
                .iter()
                .filter(|(key, _)| !key.is_empty() && parent_of(key) == path)
                .map(|(key, node)| RawEntry {
                    name: key.rsplit('/').next().unwrap_or(key).to_string(),
                    is_directory: node.is_dir,
                    size: node.data.len() as u64,
                    modified: Some(node.modified),
                }),
        );

        Ok(entries)
    }

    async fn file_exists(&self, path: &str) -> Result<bool> {
        self.check(TransportCall::Exists)?;
        let state = lock(&self.state);
        Ok(state
            .nodes
            .get(&normalize(path))
            .map(|n| !n.is_dir)
            .unwrap_or(false))
    }

    async fn folder_exists(&self, path: &str) -> Result<bool> {
        self.check(TransportCall::Exists)?;
        let state = lock(&self.state);
        Ok(Self::is_dir(&state, &normalize(path)))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        self.check(TransportCall::Mkdir)?;
        let path = normalize(path);
        let mut state = lock(&self.state);

        if path.is_empty() || state.nodes.contains_key(&path) {
            return Err(SmbError::AlreadyExists(path));
        }
        if !Self::is_dir(&state, parent_of(&path)) {
            return Err(SmbError::NotFound(parent_of(&path).to_string()));
        }
        state.nodes.insert(path, Node::dir());
        Ok(())
    }

    async fn rm(&self, path: &str) -> Result<()> {
        self.check(TransportCall::Rm)?;
        let path = normalize(path);
        let mut state = lock(&self.state);

        match state.nodes.get(&path) {
            Some(node) if !node.is_dir => {
                state.nodes.remove(&path);
                Ok(())
            }
            Some(_) => Err(SmbError::InvalidArgument(format!("{} is a directory", path))),
            None => Err(SmbError::NotFound(path)),
        }
    }

    async fn rmdir(&self, path: &str, recursive: bool) -> Result<()> {
        self.check(TransportCall::Rmdir)?;
        let path = normalize(path);
        let mut state = lock(&self.state);

        match state.nodes.get(&path) {
            Some(node) if node.is_dir => {}
            Some(_) => return Err(SmbError::InvalidArgument(format!("{} is not a directory", path))),
            None => return Err(SmbError::NotFound(path)),
        }

        let descendants: Vec<String> = state
            .nodes
            .keys()
            .filter(|key| is_descendant(key, &path))
            .cloned()
            .collect();

        if !descendants.is_empty() && !recursive {
            return Err(SmbError::Protocol("STATUS_DIRECTORY_NOT_EMPTY".to_string()));
        }
        for key in descendants {
            state.nodes.remove(&key);
        }
        state.nodes.remove(&path);
        Ok(())
    }

    async fn open_file(&self, path: &str, mode: OpenMode) -> Result<Box<dyn RemoteFile>> {
        self.check(TransportCall::Open)?;
        let path = normalize(path);
        let mut state = lock(&self.state);

        match mode {
            OpenMode::Read => match state.nodes.get(&path) {
                Some(node) if !node.is_dir => {}
                Some(_) => {
                    return Err(SmbError::InvalidArgument(format!("{} is a directory", path)))
                }
                None => return Err(SmbError::NotFound(path)),
            },
            OpenMode::Write { overwrite } => {
                if !Self::is_dir(&state, parent_of(&path)) {
                    return Err(SmbError::NotFound(parent_of(&path).to_string()));
                }
                match state.nodes.get_mut(&path) {
                    Some(node) if node.is_dir => {
                        return Err(SmbError::InvalidArgument(format!("{} is a directory", path)))
                    }
                    Some(_) if !overwrite => return Err(SmbError::AlreadyExists(path)),
                    Some(node) => {
                        node.data.clear();
                        node.modified = SystemTime::now();
                    }
                    None => {
                        state.nodes.insert(path.clone(), Node::file(&[]));
                    }
                }
            }
        }

        Ok(Box::new(MemoryFile {
            state: Arc::clone(&self.state),
            endpoint: self.endpoint.clone(),
            path,
            mode,
        }))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.check(TransportCall::Rename)?;
        let from = normalize(from);
        let to = normalize(to);
        let mut state = lock(&self.state);

        if !state.nodes.contains_key(&from) {
            return Err(SmbError::NotFound(from));
        }
        if state.nodes.contains_key(&to) {
            return Err(SmbError::AlreadyExists(to));
        }
        if !Self::is_dir(&state, parent_of(&to)) {
            return Err(SmbError::NotFound(parent_of(&to).to_string()));
        }

        let moved: Vec<String> = state
            .nodes
            .keys()
            .filter(|key| **key == from || is_descendant(key, &from))
            .cloned()
            .collect();

        for key in moved {
            if let Some(node) = state.nodes.remove(&key) {
                let new_key = format!("{}{}", to, &key[from.len()..]);
                state.nodes.insert(new_key, node);
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryFile {
    state: Arc<Mutex<MemoryState>>,
    endpoint: String,
    path: String,
    mode: OpenMode,
}

#[async_trait]
impl RemoteFile for MemoryFile {
    async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        check(&self.state, TransportCall::Read, &self.endpoint)?;
        let delay = latency(&self.state);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        state.read_log.push((self.path.clone(), offset));

        let trips = matches!(state.read_faults.get(&self.path), Some((at, _)) if offset >= *at);
        if trips {
            if let Some((_, fault)) = state.read_faults.remove(&self.path) {
                return Err(fault.to_error(&self.endpoint));
            }
        }

        let node = state
            .nodes
            .get(&self.path)
            .ok_or_else(|| SmbError::NotFound(self.path.clone()))?;
        let start = (offset as usize).min(node.data.len());
        let n = buf.len().min(node.data.len() - start);
        buf[..n].copy_from_slice(&node.data[start..start + n]);
        Ok(n)
    }

    async fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        check(&self.state, TransportCall::Write, &self.endpoint)?;
        if self.mode == OpenMode::Read {
            return Err(SmbError::Permission(format!("{} opened read-only", self.path)));
        }

        let mut state = lock(&self.state);
        let node = state
            .nodes
            .get_mut(&self.path)
            .ok_or_else(|| SmbError::NotFound(self.path.clone()))?;
        let start = offset as usize;
        let end = start + buf.len();
        if node.data.len() < end {
            node.data.resize(end, 0);
        }
        node.data[start..end].copy_from_slice(buf);
        node.modified = SystemTime::now();
        Ok(buf.len())
    }

    async fn size(&mut self) -> Result<u64> {
        let state = lock(&self.state);
        state
            .nodes
            .get(&self.path)
            .map(|node| node.data.len() as u64)
            .ok_or_else(|| SmbError::NotFound(self.path.clone()))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
