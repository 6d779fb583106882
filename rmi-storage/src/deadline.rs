//! Per-call deadlines for backend I/O.

use std::future::Future;
use std::time::Duration;

use rmi_core::{RmiResult, StorageError};

/// Run a backend call under a deadline.
///
/// On expiry the call is abandoned and `StorageError::Timeout` is returned,
/// which callers handle like any other backend failure.
pub async fn with_deadline<T, Fut>(deadline: Duration, operation: &str, fut: Fut) -> RmiResult<T>
where
    Fut: Future<Output = RmiResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout {
            operation: operation.to_string(),
            deadline,
        }
        .into()),
    }
}
