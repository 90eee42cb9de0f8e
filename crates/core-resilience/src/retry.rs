//! Bounded, classified async retry
//!
//! The loop itself knows nothing about the error type. Callers supply a
//! classification closure that decides, per failure, whether another attempt
//! is allowed.

use crate::backoff::LinearBackoff;
use std::fmt;
use std::future::Future;

/// What to do with a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the backoff delay and try again (if attempts remain)
    Retry,
    /// Stop immediately and surface the error
    Abort,
}

/// Retry policy: attempt cap plus backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay schedule between attempts
    pub backoff: LinearBackoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: LinearBackoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: LinearBackoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

/// Per-run attempt bookkeeping
///
/// `attempt` is 0-based. The context is created fresh for every retried
/// operation and dropped once it succeeds or gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    pub attempt: u32,
    pub max_attempts: u32,
}

impl RetryContext {
    fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
        }
    }

    /// Attempt number for humans (1-based)
    pub fn ordinal(&self) -> u32 {
        self.attempt + 1
    }

    /// True when the current attempt is the final one allowed
    pub fn is_last(&self) -> bool {
        self.ordinal() >= self.max_attempts
    }
}

/// Why a retried operation failed
#[derive(Debug)]
pub enum RetryError<E> {
    /// The classifier refused to retry this error
    Aborted { attempts: u32, error: E },
    /// Every allowed attempt failed with a retryable error
    Exhausted { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Aborted { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The error from the final attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Aborted { error, .. } | RetryError::Exhausted { error, .. } => error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Aborted { attempts, error } => {
                write!(f, "aborted on attempt {}: {}", attempts, error)
            }
            RetryError::Exhausted { attempts, error } => {
                write!(f, "failed after {} attempts: {}", attempts, error)
            }
        }
    }
}

/// Run `op` until it succeeds, the classifier aborts, or attempts run out
///
/// `op` receives the current [`RetryContext`] so it can adapt (for example by
/// resuming from a byte offset). Sleeps use `tokio::time`, so dropping the
/// returned future interrupts a pending backoff.
pub async fn retry_async<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    mut op: F,
    classify: C,
) -> Result<T, RetryError<E>>
where
    F: FnMut(RetryContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryDecision,
    E: fmt::Display,
{
    let mut ctx = RetryContext::new(policy.max_attempts.max(1));

    loop {
        match op(ctx).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let attempts = ctx.ordinal();

                if classify(&error) == RetryDecision::Abort {
                    tracing::debug!(attempt = attempts, %error, "Non-retryable failure");
                    return Err(RetryError::Aborted { attempts, error });
                }

                if ctx.is_last() {
                    tracing::warn!(attempts, %error, "Retry attempts exhausted");
                    return Err(RetryError::Exhausted { attempts, error });
                }

                let delay = policy.backoff.delay_for(attempts);
                tracing::info!(
                    attempt = attempts,
                    max_attempts = ctx.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "Retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                ctx.attempt += 1;
            }
        }
    }
}
