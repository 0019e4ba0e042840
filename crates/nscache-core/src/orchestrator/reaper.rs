//! Background purge of long-expired cache entries.
//!
//! An expired entry stays useful for a while: it can be served as a stale
//! fallback, and its ETag is checked with a `HEAD` so an unchanged object
//! is refreshed without a body transfer. The reaper only drops entries that
//! have been expired for longer than a grace period.

use crate::cache::CacheStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to a running reaper. Dropping it stops the task.
pub struct ReaperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    /// Signal the reaper to stop after its current pass.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Stop the reaper and wait for it to exit.
    pub async fn stop(mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

pub struct CacheReaper;

impl CacheReaper {
    /// Spawn the reaper on the current runtime.
    pub fn start(store: Arc<dyn CacheStore>, interval: Duration, grace: Duration) -> ReaperHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        info!(
            "Cache reaper running every {:?} (grace {:?})",
            interval, grace
        );
        let task_handle = tokio::spawn(Self::run(store, interval, grace, shutdown_rx));
        ReaperHandle {
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        }
    }

    async fn run(
        store: Arc<dyn CacheStore>,
        interval: Duration,
        grace: Duration,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("Cache reaper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let store = store.clone();
                    match tokio::task::spawn_blocking(move || store.purge_expired(grace)).await {
                        Ok(Ok(0)) => {}
                        Ok(Ok(purged)) => debug!("Reaper purged {} expired entries", purged),
                        Ok(Err(e)) => warn!("Reaper pass failed: {}", e),
                        Err(e) => warn!("Reaper task failed: {}", e),
                    }
                }
            }
        }
    }
}
