//! Per-call deadlines for store and cache round trips.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::storage::traits::StorageError;

/// Await `fut` for at most `timeout`.
///
/// An elapsed deadline becomes [`StorageError::Timeout`]; the future is
/// dropped, so nothing after the await point in the caller runs.
pub async fn with_deadline<T, Fut>(
    tier: &'static str,
    operation: &'static str,
    timeout: Duration,
    fut: Fut,
) -> Result<T, StorageError>
where
    Fut: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(tier, operation, timeout = ?timeout, "Deadline exceeded");
            crate::metrics::record_timeout(tier, operation);
            Err(StorageError::Timeout {
                operation: format!("{}_{}", tier, operation),
            })
        }
    }
}
