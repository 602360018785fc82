//! Market-aware provider cache.
//!
//! Rows carry only their write time. Freshness is judged on every read with
//! the TTL that applies *now*, so a quote written while the market was open
//! becomes fresh again once the session closes and the off-hours multiplier
//! kicks in. Stale rows are reported as misses and left in place. Rows that
//! are stale under every regime are removed by [`TieredCache::purge_expired`],
//! run by the `sweep` command or a [`PurgeHandle`](super::PurgeHandle) task.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::application::repos::{ProviderCacheRepo, RepoError, UpsertCacheRowParams};
use crate::market::{MarketCalendar, MarketSession};

use super::clock::{Clock, SystemClock};
use super::config::CacheConfig;

const TARGET: &str = "stockdesk::cache";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("data type `{0}` has no registered cache policy")]
    UnknownDataType(String),
    #[error("cache payload could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cache store unavailable: {0}")]
    Store(#[from] RepoError),
    #[error("cache store operation timed out")]
    Timeout,
}

#[derive(Debug, Clone, Copy)]
enum MissReason {
    Absent,
    Stale,
    UnknownType,
}

impl MissReason {
    fn as_str(self) -> &'static str {
        match self {
            MissReason::Absent => "absent",
            MissReason::Stale => "stale",
            MissReason::UnknownType => "unknown_type",
        }
    }
}

pub struct TieredCache {
    config: CacheConfig,
    calendar: MarketCalendar,
    store: Arc<dyn ProviderCacheRepo>,
    clock: Arc<dyn Clock>,
}

impl TieredCache {
    pub fn new(
        config: CacheConfig,
        calendar: MarketCalendar,
        store: Arc<dyn ProviderCacheRepo>,
    ) -> Self {
        Self {
            config,
            calendar,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn calendar(&self) -> &MarketCalendar {
        &self.calendar
    }

    /// TTL that a read issued right now would apply to `data_type`.
    pub fn effective_ttl(&self, data_type: &str) -> Option<Duration> {
        let now = self.clock.now();
        self.config
            .effective_ttl(data_type, self.calendar.is_open(now))
    }

    /// Look up a fresh value.
    ///
    /// Returns `Ok(None)` when the row is absent, stale, or the data type is
    /// unregistered (the latter also logs a warning). Store failures and
    /// undecodable payloads are returned as errors.
    pub async fn get<T>(&self, data_type: &str, key: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
    {
        let now = self.clock.now();
        let session = self.calendar.session(now);
        let market_open = session == MarketSession::Open;
        let Some(ttl) = self.config.effective_ttl(data_type, market_open) else {
            warn!(
                target = TARGET,
                data_type,
                key,
                "lookup for unregistered data type; treating as miss"
            );
            record_miss(data_type, MissReason::UnknownType);
            return Ok(None);
        };

        let row = self
            .bounded("get", data_type, self.store.get_row(data_type, key))
            .await?;
        let Some(row) = row else {
            debug!(target = TARGET, data_type, key, outcome = "miss", "cache miss");
            record_miss(data_type, MissReason::Absent);
            return Ok(None);
        };

        if is_stale(row.updated_at, now, ttl) {
            debug!(
                target = TARGET,
                data_type,
                key,
                outcome = "stale",
                %session,
                ttl_secs = ttl.as_secs(),
                "cache entry past its effective ttl"
            );
            record_miss(data_type, MissReason::Stale);
            return Ok(None);
        }

        let value = serde_json::from_value(row.payload).inspect_err(|_| {
            record_error("decode", data_type);
        })?;
        debug!(
            target = TARGET,
            data_type,
            key,
            outcome = "hit",
            %session,
            "cache hit"
        );
        counter!("stockdesk_cache_hit_total", "data_type" => data_type.to_string()).increment(1);
        Ok(Some(value))
    }

    /// Serialize and upsert `value`, stamping the write time.
    ///
    /// Fails for an unregistered data type: without a policy the row would
    /// never be judged stale.
    pub async fn set<T>(&self, data_type: &str, key: &str, value: &T) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
    {
        let max_ttl = self
            .config
            .max_possible_ttl(data_type)
            .ok_or_else(|| CacheError::UnknownDataType(data_type.to_string()))?;
        let payload = serde_json::to_value(value).inspect_err(|_| {
            record_error("encode", data_type);
        })?;

        let now = self.clock.now();
        let max_expires_at = now.saturating_add(to_time_duration(max_ttl));

        self.bounded(
            "set",
            data_type,
            self.store.upsert_row(UpsertCacheRowParams {
                data_type,
                key,
                payload,
                updated_at: now,
                max_expires_at,
            }),
        )
        .await?;

        counter!("stockdesk_cache_write_total", "data_type" => data_type.to_string()).increment(1);
        Ok(())
    }

    /// Remove the entry; a missing entry is not an error.
    pub async fn invalidate(&self, data_type: &str, key: &str) -> Result<(), CacheError> {
        self.bounded(
            "invalidate",
            data_type,
            self.store.delete_row(data_type, key),
        )
        .await?;
        debug!(target = TARGET, data_type, key, "cache entry invalidated");
        Ok(())
    }

    /// Physically remove rows past their `max_expires_at` bound. Returns the
    /// number of rows removed.
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        let now = self.clock.now();
        let purged = self
            .bounded("purge", "all", self.store.purge_expired(now))
            .await?;
        counter!("stockdesk_cache_purged_total").increment(purged);
        if purged > 0 {
            debug!(target = TARGET, purged, "purged expired cache rows");
        }
        Ok(purged)
    }

    /// Cache-aside read: serve a fresh entry, otherwise call `fetch` and store
    /// its result.
    ///
    /// Cache failures never reach the caller. A failed read falls through to
    /// `fetch`, and a failed write is logged and dropped. Errors from `fetch`
    /// propagate unchanged.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        data_type: &str,
        key: &str,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.get::<T>(data_type, key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(err) => {
                warn!(
                    target = TARGET,
                    data_type,
                    key,
                    error = %err,
                    "cache read failed; falling back to origin"
                );
            }
        }

        let value = fetch().await?;

        if let Err(err) = self.set(data_type, key, &value).await {
            warn!(
                target = TARGET,
                data_type,
                key,
                error = %err,
                "cache write failed; serving origin value uncached"
            );
        }

        Ok(value)
    }

    async fn bounded<T, F>(
        &self,
        op: &'static str,
        data_type: &str,
        operation: F,
    ) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, RepoError>>,
    {
        let result = match tokio::time::timeout(self.config.operation_timeout(), operation).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::Timeout),
        };
        if result.is_err() {
            record_error(op, data_type);
        }
        result
    }
}

fn is_stale(updated_at: OffsetDateTime, now: OffsetDateTime, ttl: Duration) -> bool {
    now - updated_at > to_time_duration(ttl)
}

fn to_time_duration(duration: Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}

fn record_miss(data_type: &str, reason: MissReason) {
    counter!(
        "stockdesk_cache_miss_total",
        "data_type" => data_type.to_string(),
        "reason" => reason.as_str()
    )
    .increment(1);
}

fn record_error(op: &'static str, data_type: &str) {
    counter!(
        "stockdesk_cache_error_total",
        "op" => op,
        "data_type" => data_type.to_string()
    )
    .increment(1);
}
