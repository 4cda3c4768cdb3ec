//! Remote Execution Timeout
//!
//! Bounds a remote round trip. When the bound elapses the in-flight future is
//! dropped, which aborts the request client-side and releases anything it
//! held, so the next execution is never blocked by an abandoned one.
//!
//! The embedded path has no timeout: SQLite runs synchronously and a
//! pathological query holds the caller for as long as it runs.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Timeout error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("query timed out after {}ms", timeout.as_millis())]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub timeout: Duration,
    /// How long the request actually ran
    pub elapsed: Duration,
}

/// Await `fut`, giving up after `timeout`. `None` waits forever.
pub async fn with_timeout<F, T>(timeout: Option<Duration>, fut: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    with_deadline(timeout, Instant::now(), fut).await
}

/// Await `fut`, giving up once `timeout` has passed since `started`.
///
/// Several calls sharing one `started` share one budget: a later call only
/// gets what the earlier ones left over.
pub async fn with_deadline<F, T>(
    timeout: Option<Duration>,
    started: Instant,
    fut: F,
) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    let Some(limit) = timeout else {
        return Ok(fut.await);
    };
    tokio::time::timeout_at(started + limit, fut)
        .await
        .map_err(|_| TimeoutError {
            timeout: limit,
            elapsed: started.elapsed(),
        })
}
