//! Idle and I/O timeout enforcement (spec §4.1).

use std::future::Future;
use std::time::Duration;

use tokio::time::error::Elapsed;

/// Wraps a future with a deadline, the way every read/write on a connection
/// socket is wrapped so a stalled peer can't pin a worker thread's
/// connection task forever.
pub async fn with_timeout<F: Future>(duration: Duration, fut: F) -> Result<F::Output, Elapsed> {
    tokio::time::timeout(duration, fut).await
}
