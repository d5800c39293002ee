//! Periodic eviction task owned by a cache instance.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CacheResult;

pub(crate) struct Sweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Run `sweep` every `interval` until [`Sweeper::stop`]. A failed pass is
    /// logged and the next tick tries again.
    pub(crate) fn spawn<F, Fut>(backend: &'static str, interval: Duration, mut sweep: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = CacheResult<usize>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let stop = token.clone();
        let handle = tokio::spawn(async move {
            // First pass one full interval after start.
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => match sweep().await {
                        Ok(0) => {}
                        Ok(removed) => debug!(backend, removed, "evicted cache entries"),
                        Err(e) => warn!(backend, error = %e, "eviction sweep failed"),
                    },
                }
            }
            debug!(backend, "eviction sweep stopped");
        });
        Self { token, handle }
    }

    pub(crate) async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "eviction task ended abnormally");
        }
    }
}
