/*!
 * Retry policies for share operations and file transfers
 *
 * Both layers use the generic loop from `sharelink-core-resilience`; they
 * differ only in which failures they are willing to repeat.
 */

use std::future::Future;

use sharelink_core_resilience::{retry_async, RetryContext, RetryDecision, RetryError, RetryPolicy};

use crate::error::{Result, ShareError};

/// Share layer: only dropped connections are worth a fresh handshake
pub fn classify_share(err: &ShareError) -> RetryDecision {
    if err.is_background_related() {
        RetryDecision::Retry
    } else {
        RetryDecision::Abort
    }
}

/// Transfer layer: retry local hiccups, hand connection loss to the share layer
pub fn classify_transfer(err: &ShareError) -> RetryDecision {
    if err.is_cancelled() || err.is_background_related() {
        return RetryDecision::Abort;
    }
    match err {
        ShareError::Auth(_)
        | ShareError::PermissionDenied(_)
        | ShareError::NotFound(_)
        | ShareError::AlreadyExists(_)
        | ShareError::InvalidPath(_)
        | ShareError::InvalidArgument(_)
        | ShareError::Unsupported(_)
        | ShareError::OutOfMemory(_)
        | ShareError::LockTimeout { .. }
        | ShareError::RetriesExhausted { .. } => RetryDecision::Abort,
        _ => RetryDecision::Retry,
    }
}

/// Flatten a retry outcome into a [`ShareError`]
///
/// Aborted attempts surface their own error unchanged; exhaustion is wrapped
/// with the path and the number of attempts made.
pub fn into_share_error(err: RetryError<ShareError>, path: &str) -> ShareError {
    match err {
        RetryError::Aborted { error, .. } => error,
        RetryError::Exhausted { attempts, error } => ShareError::RetriesExhausted {
            path: path.to_string(),
            attempts,
            last: Box::new(error),
        },
    }
}

/// Run `op` under `policy` with the given classifier
pub async fn with_retry<T, F, Fut, C>(policy: &RetryPolicy, path: &str, op: F, classify: C) -> Result<T>
where
    F: FnMut(RetryContext) -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&ShareError) -> RetryDecision,
{
    retry_async(policy, op, classify)
        .await
        .map_err(|err| {
            let err = into_share_error(err, path);
            if !err.is_cancelled() {
                tracing::warn!(
                    path,
                    severity = %err.severity(),
                    category = %err.category(),
                    error = %err,
                    "Operation failed"
                );
            }
            err
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cancel::CancelCategory;
    use sharelink_core_resilience::LinearBackoff;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, LinearBackoff::immediate())
    }

    #[test]
    fn test_share_classifier() {
        assert_eq!(
            classify_share(&ShareError::connection("nas", "reset")),
            RetryDecision::Retry
        );
        assert_eq!(
            classify_share(&ShareError::InvalidArgument("bad".into())),
            RetryDecision::Abort
        );
        assert_eq!(
            classify_share(&ShareError::Cancelled(CancelCategory::Search)),
            RetryDecision::Abort
        );
    }

    #[test]
    fn test_transfer_classifier() {
        let local_io = ShareError::Io(io::Error::new(io::ErrorKind::Interrupted, "disk busy"));
        assert_eq!(classify_transfer(&local_io), RetryDecision::Retry);
        assert_eq!(
            classify_transfer(&ShareError::Transport("STATUS_DATA_ERROR".into())),
            RetryDecision::Retry
        );
        assert_eq!(
            classify_transfer(&ShareError::Transport("connection reset by peer".into())),
            RetryDecision::Abort
        );
        assert_eq!(
            classify_transfer(&ShareError::Cancelled(CancelCategory::Download)),
            RetryDecision::Abort
        );
        assert_eq!(
            classify_transfer(&ShareError::NotFound("gone.bin".into())),
            RetryDecision::Abort
        );
    }

    #[tokio::test]
    async fn test_exhaustion_names_path_and_attempts() {
        let calls = AtomicU32::new(0);
        let err = with_retry(
            &policy(),
            "media/clip.mp4",
            |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ShareError::connection("nas", "connection reset"))
            },
            classify_share,
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("media/clip.mp4"));
        assert!(err.to_string().contains("3 attempts"));
    }

    #[tokio::test]
    async fn test_abort_keeps_original_error() {
        let calls = AtomicU32::new(0);
        let err = with_retry(
            &policy(),
            "a.txt",
            |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ShareError::InvalidArgument("negative offset".into()))
            },
            classify_share,
        )
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ShareError::InvalidArgument(_)));
    }
}
