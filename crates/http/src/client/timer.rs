//! Deadlines that work on both tokio and the browser event loop

use std::future::Future;
use std::time::Duration;

/// Run `future` to completion unless `duration` elapses first
#[cfg(not(target_arch = "wasm32"))]
pub(crate) async fn deadline<F: Future>(duration: Duration, future: F) -> Option<F::Output> {
    tokio::time::timeout(duration, future).await.ok()
}

/// Run `future` to completion unless `duration` elapses first
#[cfg(target_arch = "wasm32")]
pub(crate) async fn deadline<F: Future>(duration: Duration, future: F) -> Option<F::Output> {
    use futures::future::{Either, select};

    let future = std::pin::pin!(future);
    let timer = std::pin::pin!(gloo_timers::future::sleep(duration));
    match select(future, timer).await {
        Either::Left((output, _)) => Some(output),
        Either::Right(_) => None,
    }
}
