//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// A cached provider payload as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRow {
    pub payload: Value,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct UpsertCacheRowParams<'a> {
    pub data_type: &'a str,
    pub key: &'a str,
    pub payload: Value,
    pub updated_at: OffsetDateTime,
    /// Upper bound on freshness under every TTL regime; only the sweep reads it.
    pub max_expires_at: OffsetDateTime,
}

/// Key-value store behind the tiered provider cache.
///
/// Rows are identified by `(data_type, key)`. Writes are last-write-wins by
/// `updated_at`: an upsert older than the stored row is ignored.
#[async_trait]
pub trait ProviderCacheRepo: Send + Sync {
    async fn get_row(&self, data_type: &str, key: &str) -> Result<Option<CacheRow>, RepoError>;

    async fn upsert_row(&self, params: UpsertCacheRowParams<'_>) -> Result<(), RepoError>;

    /// Delete a row; deleting an absent row is not an error.
    async fn delete_row(&self, data_type: &str, key: &str) -> Result<(), RepoError>;

    /// Physically remove rows whose `max_expires_at` is before `now`.
    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError>;
}
