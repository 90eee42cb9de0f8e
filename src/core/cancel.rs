//! Cooperative cancellation
//!
//! One [`CancelFlag`] exists per [`CancelCategory`]. An operation resets its
//! category's flag when it starts; a user action raises it; every chunk loop,
//! listing loop and recursive descent below the operation observes it through
//! [`CancelFlag::check`]. Raising a flag never blocks and never takes the
//! share lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, ShareError};

/// Operation families that share one cancellation flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelCategory {
    Search,
    Download,
    Upload,
}

impl CancelCategory {
    pub const ALL: [CancelCategory; 3] = [
        CancelCategory::Search,
        CancelCategory::Download,
        CancelCategory::Upload,
    ];
}

impl fmt::Display for CancelCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCategory::Search => write!(f, "search"),
            CancelCategory::Download => write!(f, "download"),
            CancelCategory::Upload => write!(f, "upload"),
        }
    }
}

/// Shared, resettable cancellation flag
#[derive(Debug, Clone)]
pub struct CancelFlag {
    category: CancelCategory,
    raised: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new(category: CancelCategory) -> Self {
        Self {
            category,
            raised: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn category(&self) -> CancelCategory {
        self.category
    }

    pub fn cancel(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Clear the flag. Only the start of a new operation of this category does this.
    pub fn reset(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// `Err(ShareError::Cancelled)` once the flag is raised
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            tracing::debug!(category = %self.category, "Cancellation observed");
            Err(ShareError::Cancelled(self.category))
        } else {
            Ok(())
        }
    }
}

/// The three category flags of one engine
#[derive(Debug, Clone)]
pub struct CancelRegistry {
    search: CancelFlag,
    download: CancelFlag,
    upload: CancelFlag,
}

impl Default for CancelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self {
            search: CancelFlag::new(CancelCategory::Search),
            download: CancelFlag::new(CancelCategory::Download),
            upload: CancelFlag::new(CancelCategory::Upload),
        }
    }

    pub fn flag(&self, category: CancelCategory) -> &CancelFlag {
        match category {
            CancelCategory::Search => &self.search,
            CancelCategory::Download => &self.download,
            CancelCategory::Upload => &self.upload,
        }
    }

    /// Reset the category's flag and hand a clone to the new operation
    pub fn begin(&self, category: CancelCategory) -> CancelFlag {
        let flag = self.flag(category);
        flag.reset();
        flag.clone()
    }

    pub fn cancel(&self, category: CancelCategory) {
        tracing::info!(category = %category, "Cancellation requested");
        self.flag(category).cancel();
    }

    pub fn cancel_all(&self) {
        for category in CancelCategory::ALL {
            self.cancel(category);
        }
    }
}
