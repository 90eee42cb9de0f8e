//! Credential collaborator
//!
//! The engine never stores credentials itself. It asks a [`CredentialStore`]
//! for the descriptor of a connection id at the start of every operation.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Result, ShareError};
use crate::protocols::smb::ConnectionDescriptor;

/// Resolves connection ids to descriptors
pub trait CredentialStore: Send + Sync {
    fn descriptor(&self, connection_id: &str) -> Result<ConnectionDescriptor>;
}

/// Process-local credential store
///
/// # Example
///
/// ```
/// use sharelink::engine::{CredentialStore, MemoryCredentialStore};
/// use sharelink::protocols::smb::ConnectionDescriptor;
///
/// let store = MemoryCredentialStore::new();
/// store.insert("nas", ConnectionDescriptor::new("nas.local", "media"));
/// assert_eq!(store.descriptor("nas").unwrap().share, "media");
/// assert!(store.descriptor("other").is_err());
/// ```
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<String, ConnectionDescriptor>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with a single entry
    pub fn single(connection_id: impl Into<String>, descriptor: ConnectionDescriptor) -> Self {
        let store = Self::new();
        store.insert(connection_id, descriptor);
        store
    }

    pub fn insert(&self, connection_id: impl Into<String>, descriptor: ConnectionDescriptor) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(connection_id.into(), descriptor);
    }

    pub fn remove(&self, connection_id: &str) -> Option<ConnectionDescriptor> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(connection_id)
    }

    /// Registered connection ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = entries.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn descriptor(&self, connection_id: &str) -> Result<ConnectionDescriptor> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(connection_id)
            .cloned()
            .ok_or_else(|| ShareError::Config(format!("unknown connection id: {}", connection_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_remove() {
        let store = MemoryCredentialStore::new();
        store.insert("b", ConnectionDescriptor::new("srv", "two"));
        store.insert("a", ConnectionDescriptor::new("srv", "one").with_credentials("u", "p"));

        assert_eq!(store.ids(), vec!["a", "b"]);
        assert!(!store.descriptor("a").unwrap().is_guest());

        assert!(store.remove("a").is_some());
        assert!(matches!(store.descriptor("a"), Err(ShareError::Config(_))));
    }
}
