//! The wait used for busy panes and watch-mode polling.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// A cancellable pause between turns.
pub trait Countdown: Send + Sync {
    /// Wait `seconds`, returning early once `cancel` fires.
    fn wait<'a>(&'a self, seconds: u64, cancel: &'a CancellationToken) -> BoxFuture<'a, ()>;
}

/// Plain sleep raced against the token. Used off a terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepCountdown;

impl Countdown for SleepCountdown {
    fn wait<'a>(&'a self, seconds: u64, cancel: &'a CancellationToken) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
            }
        })
    }
}
