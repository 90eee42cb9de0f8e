//! SMB protocol types and connection descriptors

use std::time::SystemTime;

use zeroize::Zeroize;

/// Everything needed to reach one share
///
/// Supplied per operation by the credential store and never mutated while
/// the operation runs.
///
/// # Example
///
/// ```
/// use sharelink::protocols::smb::{ConnectionDescriptor, SmbAuth};
///
/// let guest = ConnectionDescriptor::new("nas.local", "media");
/// assert!(matches!(guest.auth(), SmbAuth::Guest));
///
/// let user = ConnectionDescriptor::new("nas.local", "media")
///     .with_credentials("jdoe", "secret")
///     .with_domain("ACME");
/// assert!(matches!(user.auth(), SmbAuth::Ntlm { .. }));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    /// Hostname or IP address (e.g., "nas.local")
    pub server: String,

    /// SMB port (default: 445)
    pub port: Option<u16>,

    /// Share name (e.g., "media")
    pub share: String,

    pub username: String,

    pub password: Secret,

    /// Optional NTLM domain
    pub domain: Option<String>,
}

impl ConnectionDescriptor {
    pub fn new(server: impl Into<String>, share: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: None,
            share: share.into(),
            username: String::new(),
            password: Secret::default(),
            domain: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = Secret(password.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Empty username and password means guest access
    pub fn is_guest(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }

    /// Authentication method derived from the credentials
    pub fn auth(&self) -> SmbAuth {
        if self.is_guest() {
            SmbAuth::Guest
        } else {
            SmbAuth::Ntlm {
                username: self.username.clone(),
                password: self.password.clone(),
                domain: self.domain.clone(),
            }
        }
    }

    /// `server\share`, used in log lines and error messages
    pub fn endpoint(&self) -> String {
        format!("{}\\{}", self.server, self.share)
    }
}

/// SMB authentication methods
#[derive(Debug, Clone)]
pub enum SmbAuth {
    /// Guest/anonymous session
    Guest,

    /// NTLMv2 authentication
    Ntlm {
        username: String,
        password: Secret,
        domain: Option<String>,
    },
}

/// Secret wrapper for credentials
///
/// Zeroes memory on drop and never prints its contents.
#[derive(Clone, Default)]
pub struct Secret(pub String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

/// Directory entry as reported by the transport, before filtering
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// Directory entry returned by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    pub name: String,
    /// Share-relative path using `/` separators
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl RemoteEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Access requested when opening a remote file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Generic read, shared read access
    Read,
    /// Generic write; `overwrite` truncates an existing file
    Write { overwrite: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug() {
        let secret = Secret("password123".to_string());
        let debug_str = format!("{:?}", secret);
        assert!(!debug_str.contains("password123"));
        assert!(debug_str.contains("REDACTED"));
    }

    #[test]
    fn test_guest_when_credentials_empty() {
        let descriptor = ConnectionDescriptor::new("server", "share");
        assert!(descriptor.is_guest());
        assert!(matches!(descriptor.auth(), SmbAuth::Guest));
    }

    #[test]
    fn test_username_without_password_is_not_guest() {
        let descriptor = ConnectionDescriptor::new("server", "share").with_credentials("bob", "");
        assert!(!descriptor.is_guest());
        match descriptor.auth() {
            SmbAuth::Ntlm { username, password, domain } => {
                assert_eq!(username, "bob");
                assert!(password.is_empty());
                assert!(domain.is_none());
            }
            SmbAuth::Guest => panic!("expected NTLM auth"),
        }
    }

    #[test]
    fn test_endpoint_format() {
        let descriptor = ConnectionDescriptor::new("fileserver", "projects").with_port(4450);
        assert_eq!(descriptor.endpoint(), "fileserver\\projects");
        assert_eq!(descriptor.port, Some(4450));
    }
}
