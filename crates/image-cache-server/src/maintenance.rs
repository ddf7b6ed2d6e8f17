//! Lifecycle-driven cache maintenance
//!
//! A periodic sweep stands in for the host's "entered background" signal and
//! runs under a bounded execution grant. Shutdown runs one last sweep to
//! completion.

use image_disk_cache::{CacheCleaned, ExecutionGrant, GrantEnd};
use image_retrieval::ImageCache;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Run an expiration sweep every `interval`, each under a grant of `budget`
pub fn spawn_periodic_sweep(
    cache: ImageCache,
    interval: Duration,
    budget: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; skip it so startup is quiet
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let grant = ExecutionGrant::new(budget, |reason| match reason {
                GrantEnd::Completed => debug!("Background sweep finished within its grant"),
                GrantEnd::Expired => warn!("Background sweep outlived its grant"),
            });

            match cache.clean_expired_in_background(grant).await {
                Ok(Ok(report)) => debug!(
                    expired = report.expired.len(),
                    evicted = report.evicted.len(),
                    "Periodic sweep done"
                ),
                Ok(Err(e)) => warn!(error = %e, "Periodic sweep failed"),
                Err(e) => warn!(error = %e, "Periodic sweep task failed"),
            }
        }
    })
}

/// Log every maintenance notification until the cache is dropped
pub fn spawn_cleanup_logger(mut cleaned: broadcast::Receiver<CacheCleaned>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match cleaned.recv().await {
                Ok(event) => info!(files = event.file_names.len(), "Disk cache cleaned"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed disk cache notifications")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Final sweep on termination, run to completion
pub async fn clean_on_shutdown(cache: &ImageCache) {
    match cache.clean_expired().await {
        Ok(report) => info!(
            deleted = report.deleted().len(),
            remaining_size = report.remaining_size,
            "Shutdown sweep done"
        ),
        Err(e) => warn!(error = %e, "Shutdown sweep failed"),
    }
}
