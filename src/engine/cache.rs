//! Cache collaborator
//!
//! Listing and search results may be cached outside the engine. After every
//! successful mutation the engine invalidates the touched path and its
//! parent folder, plus the parent's search results.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

/// Receives invalidation calls after mutations
pub trait CacheInvalidator: Send + Sync {
    /// Drop cached listings keyed by `path_key(connection_id, path)`
    fn invalidate_path(&self, connection_id: &str, path: &str);

    /// Drop cached search results rooted at `path`
    fn invalidate_search(&self, connection_id: &str, path: &str);
}

/// Key under which listings for a path are cached
pub fn path_key(connection_id: &str, path: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    connection_id.hash(&mut hasher);
    path.hash(&mut hasher);
    hasher.finish()
}

/// Used when no cache is attached
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate_path(&self, _connection_id: &str, _path: &str) {}

    fn invalidate_search(&self, _connection_id: &str, _path: &str) {}
}

/// A single invalidation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Path { key: u64, path: String },
    Search { connection_id: String, path: String },
}

/// Keeps every invalidation; handy for asserting on engine behaviour
#[derive(Debug, Default)]
pub struct InvalidationLog {
    calls: Mutex<Vec<Invalidation>>,
}

impl InvalidationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Invalidation> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Paths invalidated by key, in call order
    pub fn paths(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Invalidation::Path { path, .. } => Some(path),
                Invalidation::Search { .. } => None,
            })
            .collect()
    }

    fn push(&self, call: Invalidation) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

impl CacheInvalidator for InvalidationLog {
    fn invalidate_path(&self, connection_id: &str, path: &str) {
        self.push(Invalidation::Path {
            key: path_key(connection_id, path),
            path: path.to_string(),
        });
    }

    fn invalidate_search(&self, connection_id: &str, path: &str) {
        self.push(Invalidation::Search {
            connection_id: connection_id.to_string(),
            path: path.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_key_distinguishes_connections() {
        assert_eq!(path_key("a", "docs"), path_key("a", "docs"));
        assert_ne!(path_key("a", "docs"), path_key("b", "docs"));
    }

    #[test]
    fn test_log_records_in_order() {
        let log = InvalidationLog::new();
        log.invalidate_path("nas", "docs/a.txt");
        log.invalidate_search("nas", "docs");
        log.invalidate_path("nas", "docs");

        assert_eq!(log.paths(), vec!["docs/a.txt", "docs"]);
        assert_eq!(log.calls().len(), 3);
    }
}
