//! Periodic eviction of expired blobs

use crate::store::ObjectStore;
use crate::types::EvictionReport;
use chrono::{DateTime, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

impl ObjectStore {
    /// Evict everything that has expired as of now
    pub async fn run_eviction_tick(&self) -> EvictionReport {
        self.evict_expired_at(Utc::now()).await
    }

    /// Evict every record whose expiration is at or before `now`.
    ///
    /// The blob is deleted first and the record only once the blob is gone.
    /// A failed delete keeps the record so the next tick retries it; there
    /// is no retry limit.
    pub async fn evict_expired_at(&self, now: DateTime<Utc>) -> EvictionReport {
        let mut report = EvictionReport::default();

        for (handle, metadata) in self.snapshot().await {
            if !metadata.is_expired_at(now) {
                continue;
            }
            report.expired += 1;

            match self.blobs().delete(&handle).await {
                Ok(existed) => {
                    self.remove(&handle).await;
                    report.evicted += 1;
                    if existed {
                        debug!(handle = %handle, "Deleted expired blob");
                    } else {
                        debug!(handle = %handle, "Expired blob already absent");
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(handle = %handle, error = %e, "Failed to delete expired blob, will retry");
                }
            }
        }

        self.evictions
            .fetch_add(report.evicted as u64, Ordering::Relaxed);
        self.eviction_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);

        if report.expired > 0 {
            info!(
                evicted = report.evicted,
                failed = report.failed,
                "Eviction sweep finished"
            );
        }
        report
    }
}

/// Run an eviction tick every `period` for as long as the task lives.
///
/// The first tick happens one full period after spawning.
pub fn spawn_sweeper(store: Arc<ObjectStore>, period: Duration) -> JoinHandle<()> {
    let period = period.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(period_secs = period.as_secs_f64(), "Eviction sweeper started");
        loop {
            ticker.tick().await;
            store.run_eviction_tick().await;
        }
    })
}
