use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;

use crate::application::repos::{CacheRow, ProviderCacheRepo, RepoError, UpsertCacheRowParams};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct ProviderCacheRow {
    payload: Value,
    updated_at: OffsetDateTime,
}

impl From<ProviderCacheRow> for CacheRow {
    fn from(row: ProviderCacheRow) -> Self {
        Self {
            payload: row.payload,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl ProviderCacheRepo for PostgresRepositories {
    async fn get_row(&self, data_type: &str, key: &str) -> Result<Option<CacheRow>, RepoError> {
        let row = sqlx::query_as::<_, ProviderCacheRow>(
            r#"
            SELECT payload, updated_at
            FROM provider_cache
            WHERE data_type = $1 AND cache_key = $2
            "#,
        )
        .bind(data_type)
        .bind(key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(CacheRow::from))
    }

    async fn upsert_row(&self, params: UpsertCacheRowParams<'_>) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO provider_cache (data_type, cache_key, payload, updated_at, max_expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (data_type, cache_key) DO UPDATE
            SET payload = EXCLUDED.payload,
                updated_at = EXCLUDED.updated_at,
                max_expires_at = EXCLUDED.max_expires_at
            WHERE provider_cache.updated_at <= EXCLUDED.updated_at
            "#,
        )
        .bind(params.data_type)
        .bind(params.key)
        .bind(params.payload)
        .bind(params.updated_at)
        .bind(params.max_expires_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn delete_row(&self, data_type: &str, key: &str) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM provider_cache WHERE data_type = $1 AND cache_key = $2")
            .bind(data_type)
            .bind(key)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM provider_cache WHERE max_expires_at < $1")
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}
