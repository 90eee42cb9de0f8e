//! Recursive name search over a connected share

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::core::cancel::CancelFlag;
use crate::core::path;
use crate::core::pattern::NamePattern;
use crate::error::{Result, ShareError};
use crate::protocols::smb::{EntryKind, RawEntry, RemoteEntry, SmbShare};

/// Which entry kinds a search returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchType {
    #[default]
    All,
    FilesOnly,
    FoldersOnly,
}

impl SearchType {
    /// Numeric codes used by callers: 0 all, 1 files, 2 folders
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(SearchType::All),
            1 => Ok(SearchType::FilesOnly),
            2 => Ok(SearchType::FoldersOnly),
            other => Err(ShareError::InvalidArgument(format!("unknown search type {}", other))),
        }
    }

    fn accepts(&self, kind: EntryKind) -> bool {
        match self {
            SearchType::All => true,
            SearchType::FilesOnly => kind == EntryKind::File,
            SearchType::FoldersOnly => kind == EntryKind::Directory,
        }
    }
}

/// Parameters of one search
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub path: String,
    pub query: String,
    pub search_type: SearchType,
    pub include_subfolders: bool,
}

impl SearchRequest {
    pub fn new(path: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: query.into(),
            search_type: SearchType::All,
            include_subfolders: true,
        }
    }

    pub fn with_type(mut self, search_type: SearchType) -> Self {
        self.search_type = search_type;
        self
    }

    pub fn recursive(mut self, include_subfolders: bool) -> Self {
        self.include_subfolders = include_subfolders;
        self
    }
}

/// Matches found so far, and whether the walk stopped early
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub entries: Vec<RemoteEntry>,
    pub cancelled: bool,
}

/// Turn a raw listing into engine entries, dropping `.` and `..`
pub(crate) fn classify_listing(dir: &str, raw: Vec<RawEntry>) -> Vec<RemoteEntry> {
    raw.into_iter()
        .filter(|entry| entry.name != "." && entry.name != "..")
        .map(|entry| RemoteEntry {
            path: path::join(dir, &entry.name),
            kind: if entry.is_directory {
                EntryKind::Directory
            } else {
                EntryKind::File
            },
            name: entry.name,
            size: entry.size,
            modified: entry.modified,
        })
        .collect()
}

pub(crate) struct Walker<'a> {
    pub share: &'a dyn SmbShare,
    pub pattern: &'a NamePattern,
    pub request: &'a SearchRequest,
    pub cancel: &'a CancelFlag,
}

impl<'a> Walker<'a> {
    /// Depth-first search from `root`; cancellation stops the walk but keeps
    /// what was found
    pub async fn run(&self, root: &str) -> Result<SearchResults> {
        let mut entries = Vec::new();
        match self.walk(root.to_string(), true, &mut entries).await {
            Ok(()) => Ok(SearchResults {
                entries,
                cancelled: false,
            }),
            Err(e) if e.is_cancelled() => Ok(SearchResults {
                entries,
                cancelled: true,
            }),
            Err(e) => Err(e),
        }
    }

    fn walk<'s>(&'s self, dir: String, is_root: bool, out: &'s mut Vec<RemoteEntry>) -> BoxFuture<'s, Result<()>> {
        async move {
            self.cancel.check()?;

            let listing = match self.share.list(&dir).await {
                Ok(raw) => classify_listing(&dir, raw),
                // The root has to be readable; a broken subtree only loses its own results
                Err(e) if is_root => return Err(e.into()),
                Err(e) => {
                    let err = ShareError::from(e);
                    tracing::warn!(path = %dir, error = %err, "Skipping unreadable folder during search");
                    return Ok(());
                }
            };

            for entry in listing {
                self.cancel.check()?;

                if self.request.search_type.accepts(entry.kind) && self.pattern.matches(&entry.name) {
                    out.push(entry.clone());
                }

                if entry.is_dir() && self.request.include_subfolders {
                    self.cancel.check()?;
                    self.walk(entry.path, false, out).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cancel::CancelCategory;

    #[test]
    fn test_search_type_codes() {
        assert_eq!(SearchType::from_code(0).unwrap(), SearchType::All);
        assert_eq!(SearchType::from_code(1).unwrap(), SearchType::FilesOnly);
        assert_eq!(SearchType::from_code(2).unwrap(), SearchType::FoldersOnly);
        assert!(SearchType::from_code(3).is_err());
    }

    #[test]
    fn test_classify_listing_skips_dot_entries() {
        let raw = vec![
            RawEntry {
                name: ".".into(),
                is_directory: true,
                size: 0,
                modified: None,
            },
            RawEntry {
                name: "..".into(),
                is_directory: true,
                size: 0,
                modified: None,
            },
            RawEntry {
                name: "a.txt".into(),
                is_directory: false,
                size: 3,
                modified: None,
            },
            RawEntry {
                name: "sub".into(),
                is_directory: true,
                size: 0,
                modified: None,
            },
        ];

        let entries = classify_listing("docs", raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "docs/a.txt");
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[1].kind, EntryKind::Directory);
    }

    #[tokio::test]
    async fn test_walk_keeps_partial_results_on_cancel() {
        use crate::protocols::smb::{MemoryTransport, SmbAuth, SmbTransport};

        let transport = MemoryTransport::new();
        transport.add_file("a.txt", b"a");
        transport.add_file("b.txt", b"b");

        let mut conn = transport.connect("nas", None).await.unwrap();
        let mut session = conn.authenticate(&SmbAuth::Guest).await.unwrap();
        let share = session.connect_share("data").await.unwrap();

        let cancel = CancelFlag::new(CancelCategory::Search);
        cancel.cancel();
        let pattern = NamePattern::new("*.txt").unwrap();
        let request = SearchRequest::new("", "*.txt");
        let walker = Walker {
            share: share.as_ref(),
            pattern: &pattern,
            request: &request,
            cancel: &cancel,
        };

        let results = walker.run("").await.unwrap();
        assert!(results.cancelled);
        assert!(results.entries.is_empty());
    }
}
