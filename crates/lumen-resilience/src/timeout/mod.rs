//! Timeout wrapper for async operations.

use lumen_core::LumenError;
use std::time::Duration;

/// Wraps an async operation with a timeout.
pub async fn with_timeout<F, Fut, T>(duration: Duration, f: F) -> Result<T, LumenError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, LumenError>>,
{
    tokio::time::timeout(duration, f())
        .await
        .map_err(|_| LumenError::Timeout(format!("Operation timed out after {:?}", duration)))?
}

/// Runs `f` under a timeout when one is given, otherwise waits indefinitely.
pub async fn with_optional_timeout<F, Fut, T>(duration: Option<Duration>, f: F) -> Result<T, LumenError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, LumenError>>,
{
    match duration {
        Some(duration) => with_timeout(duration, f).await,
        None => f().await,
    }
}
