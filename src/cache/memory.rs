//! In-process backing store for the tiered cache.
//!
//! Used when no database is configured and throughout the test suite.

use std::collections::{HashMap, hash_map::Entry};

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::application::repos::{CacheRow, ProviderCacheRepo, RepoError, UpsertCacheRowParams};

#[derive(Debug, Clone)]
struct StoredRow {
    payload: Value,
    updated_at: OffsetDateTime,
    max_expires_at: OffsetDateTime,
}

#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    rows: RwLock<HashMap<(String, String), StoredRow>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

fn row_key(data_type: &str, key: &str) -> (String, String) {
    (data_type.to_string(), key.to_string())
}

#[async_trait]
impl ProviderCacheRepo for MemoryCacheStore {
    async fn get_row(&self, data_type: &str, key: &str) -> Result<Option<CacheRow>, RepoError> {
        let guard = self.rows.read().await;
        Ok(guard.get(&row_key(data_type, key)).map(|row| CacheRow {
            payload: row.payload.clone(),
            updated_at: row.updated_at,
        }))
    }

    async fn upsert_row(&self, params: UpsertCacheRowParams<'_>) -> Result<(), RepoError> {
        let mut guard = self.rows.write().await;
        let incoming = StoredRow {
            payload: params.payload,
            updated_at: params.updated_at,
            max_expires_at: params.max_expires_at,
        };
        match guard.entry(row_key(params.data_type, params.key)) {
            Entry::Occupied(mut entry) => {
                if entry.get().updated_at <= incoming.updated_at {
                    entry.insert(incoming);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(incoming);
            }
        }
        Ok(())
    }

    async fn delete_row(&self, data_type: &str, key: &str) -> Result<(), RepoError> {
        self.rows.write().await.remove(&row_key(data_type, key));
        Ok(())
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let mut guard = self.rows.write().await;
        let before = guard.len();
        guard.retain(|_, row| row.max_expires_at >= now);
        Ok((before - guard.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn params<'a>(key: &'a str, max_expires_at: OffsetDateTime) -> UpsertCacheRowParams<'a> {
        UpsertCacheRowParams {
            data_type: "quote",
            key,
            payload: json!({ "symbol": key }),
            updated_at: datetime!(2024-01-08 15:00 UTC),
            max_expires_at,
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_row() {
        let store = MemoryCacheStore::new();
        store
            .upsert_row(params("AAPL", datetime!(2024-01-08 15:06 UTC)))
            .await
            .expect("first write");
        store
            .upsert_row(UpsertCacheRowParams {
                payload: json!({ "symbol": "AAPL", "price": 190.1 }),
                ..params("AAPL", datetime!(2024-01-08 15:06 UTC))
            })
            .await
            .expect("second write");

        let row = store
            .get_row("quote", "AAPL")
            .await
            .expect("read")
            .expect("row present");
        assert_eq!(row.payload["price"], json!(190.1));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn older_write_does_not_replace_newer_row() {
        let store = MemoryCacheStore::new();
        store
            .upsert_row(UpsertCacheRowParams {
                payload: json!({ "v": "new" }),
                updated_at: datetime!(2024-01-08 15:05 UTC),
                ..params("AAPL", datetime!(2024-01-08 15:11 UTC))
            })
            .await
            .expect("newer write");
        store
            .upsert_row(UpsertCacheRowParams {
                payload: json!({ "v": "old" }),
                ..params("AAPL", datetime!(2024-01-08 15:06 UTC))
            })
            .await
            .expect("late older write is accepted and ignored");

        let row = store
            .get_row("quote", "AAPL")
            .await
            .expect("read")
            .expect("row present");
        assert_eq!(row.payload, json!({ "v": "new" }));
        assert_eq!(row.updated_at, datetime!(2024-01-08 15:05 UTC));

        let removed = store
            .purge_expired(datetime!(2024-01-08 15:08 UTC))
            .await
            .expect("purge");
        assert_eq!(removed, 0, "newer row keeps its own expiry bound");
    }

    #[tokio::test]
    async fn rows_are_scoped_by_data_type() {
        let store = MemoryCacheStore::new();
        store
            .upsert_row(params("AAPL", datetime!(2024-01-08 15:06 UTC)))
            .await
            .expect("write");

        assert!(
            store
                .get_row("profile", "AAPL")
                .await
                .expect("read")
                .is_none()
        );
    }

    #[tokio::test]
    async fn delete_of_missing_row_is_ok() {
        let store = MemoryCacheStore::new();
        store.delete_row("quote", "MSFT").await.expect("no-op delete");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn purge_removes_only_rows_past_their_bound() {
        let store = MemoryCacheStore::new();
        store
            .upsert_row(params("AAPL", datetime!(2024-01-08 15:06 UTC)))
            .await
            .expect("write");
        store
            .upsert_row(params("MSFT", datetime!(2024-01-08 21:00 UTC)))
            .await
            .expect("write");

        let removed = store
            .purge_expired(datetime!(2024-01-08 16:00 UTC))
            .await
            .expect("purge");

        assert_eq!(removed, 1);
        assert!(store.get_row("quote", "AAPL").await.expect("read").is_none());
        assert!(store.get_row("quote", "MSFT").await.expect("read").is_some());
    }
}
