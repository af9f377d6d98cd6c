//! Thin wrapper around the pieces of `tokio` the topology manager's actor loops need.
//!
//! The upstream driver carries an abstraction over both `tokio` and `async-std`; this crate
//! only ever runs on `tokio`, so the indirection is dropped in favor of plain free functions
//! with the same call shape (`runtime::spawn`, `runtime::delay_for`, `runtime::timeout`).

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Spawns a future onto the `tokio` runtime, returning a handle that can be awaited or
/// dropped to detach it.
pub(crate) fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(fut)
}

/// Sleeps for the given duration.
pub(crate) async fn delay_for(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Runs `fut` to completion, failing with `Error::timeout()` if it does not resolve within
/// `duration`.
pub(crate) async fn timeout<F>(duration: Duration, fut: F) -> Result<F::Output>
where
    F: Future,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| Error::timeout())
}
