//! Backoff builders and retryable error classification.
//!
//! Backend outages are retried with exponential backoff and jitter, without
//! an attempt cap: the engine favors liveness over fail-fast when storage is
//! down. Version conflicts are never retried here; the write path counts its
//! own attempts.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

use crate::store::StoreError;

/// Backoff for storage-unavailable retries.
///
/// - Min delay: 50ms
/// - Max delay: 5s
/// - No practical attempt cap
/// - Jitter enabled
pub fn unavailable_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(usize::MAX)
        .with_jitter()
}

/// Whether a storage error is a transient outage worth retrying.
///
/// `DuplicateVersion` is deliberately excluded: it is a conflict signal for
/// the optimistic write loop, not a fault.
pub fn is_transient(error: &StoreError) -> bool {
    matches!(error, StoreError::Unavailable(_))
}

/// Run a store operation, retrying transient outages indefinitely.
pub(crate) async fn with_store_backoff<T, F, Fut>(op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    op.retry(unavailable_backoff())
        .when(is_transient)
        .notify(|error, delay| {
            warn!(error = %error, delay_ms = delay.as_millis() as u64, "storage unavailable, backing off");
        })
        .await
}
