//! Periodic removal of expired rows for stores nothing else sweeps.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::tiered::TieredCache;

const TARGET: &str = "stockdesk::cache::purge";

/// Longest wait between purge passes.
pub const MAX_PURGE_INTERVAL: Duration = Duration::from_secs(86_400);

impl TieredCache {
    /// Run [`TieredCache::purge_expired`] every `interval` on the current
    /// tokio runtime until the returned handle is stopped or dropped.
    pub fn spawn_purger(self: &Arc<Self>, interval: Duration) -> PurgeHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let cache = Arc::clone(self);
        let period = interval.clamp(Duration::from_millis(1), MAX_PURGE_INTERVAL);

        let task = tokio::spawn(async move {
            let now = Instant::now();
            let first = now.checked_add(period).unwrap_or(now);
            let mut ticker = tokio::time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = cache.purge_expired().await {
                            warn!(target = TARGET, error = %err, "cache purge failed");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!(target = TARGET, "cache purger stopped");
        });

        PurgeHandle {
            stop_tx,
            task: Some(task),
        }
    }
}

#[derive(Debug)]
pub struct PurgeHandle {
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PurgeHandle {
    /// Signal the purger and wait for it to exit.
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(target = TARGET, error = %err, "cache purger ended abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use crate::application::repos::ProviderCacheRepo;
    use crate::cache::{CacheConfig, DataTypeConfig, ManualClock, MemoryCacheStore};
    use crate::market::MarketCalendar;

    use super::*;

    fn cache(clock: Arc<ManualClock>, store: Arc<MemoryCacheStore>) -> Arc<TieredCache> {
        let store: Arc<dyn ProviderCacheRepo> = store;
        Arc::new(
            TieredCache::new(
                CacheConfig::empty().register(
                    "snapshot",
                    DataTypeConfig::price_sensitive(Duration::from_secs(300)),
                ),
                MarketCalendar::us_equities(),
                store,
            )
            .with_clock(clock),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn purger_drops_expired_rows_and_stops() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-01-08 15:00 UTC)));
        let store = Arc::new(MemoryCacheStore::new());
        let cache = cache(clock.clone(), store.clone());

        cache
            .set("snapshot", "AAPL", &serde_json::json!({ "price": 1.0 }))
            .await
            .expect("write");
        let handle = cache.spawn_purger(Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.len().await, 1);

        clock.set(datetime!(2024-01-08 15:31 UTC));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(store.is_empty().await);
        assert!(!handle.is_finished());

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_ends_the_purger() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-01-08 15:00 UTC)));
        let cache = cache(clock, Arc::new(MemoryCacheStore::new()));
        let handle = cache.spawn_purger(Duration::from_secs(u64::MAX));
        drop(handle);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(Arc::strong_count(&cache), 1);
    }
}
