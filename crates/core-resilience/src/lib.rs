//! Sharelink Core Resilience: pure-logic retry primitives
//!
//! # Overview
//!
//! - **Linear Backoff**: `attempt × base` delays, optionally jittered
//! - **Classified Retry**: an async retry loop bounded by an attempt cap, where
//!   a caller-supplied closure decides which failures are worth another attempt
//!
//! This crate has no knowledge of SMB, sessions or files. The engine layers
//! its own error classification on top.
//!
//! # Usage Example
//!
//! ```no_run
//! use sharelink_core_resilience::{retry_async, LinearBackoff, RetryDecision, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let policy = RetryPolicy::new(3, LinearBackoff::new(Duration::from_millis(1000)));
//!
//! let result: Result<u32, _> = retry_async(
//!     &policy,
//!     |_ctx| async { Err::<u32, _>("connection reset") },
//!     |err: &&str| {
//!         if err.contains("reset") {
//!             RetryDecision::Retry
//!         } else {
//!             RetryDecision::Abort
//!         }
//!     },
//! )
//! .await;
//! assert!(result.is_err());
//! # }
//! ```

pub mod backoff;
pub mod retry;

pub use backoff::LinearBackoff;
pub use retry::{retry_async, RetryContext, RetryDecision, RetryError, RetryPolicy};

/// Prelude module for convenient imports
pub mod prelude {
    pub use super::backoff::LinearBackoff;
    pub use super::retry::{retry_async, RetryContext, RetryDecision, RetryError, RetryPolicy};
}
