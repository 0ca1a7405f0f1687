//! Persistent `CacheStore` backed by the `response_cache` table.
//!
//! Expiry is stored as unix milliseconds and evaluated against the injected
//! clock, so the memory and sqlite backends agree on what is live.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kickoff_core::cache::store::expires_at;
use kickoff_core::clock::{system_clock, Clock};
use kickoff_core::{CacheError, CacheStore};
use sqlx::Row;
use tracing::debug;

use crate::DbPool;

pub struct SqliteCacheStore {
    pool: DbPool,
    clock: Arc<dyn Clock>,
}

impl SqliteCacheStore {
    pub fn new(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub fn with_system_clock(pool: DbPool) -> Self {
        Self::new(pool, system_clock())
    }

    fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Deletes entries that have already expired. Reads skip them anyway;
    /// this only reclaims space.
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        let removed = sqlx::query(
            "DELETE FROM response_cache WHERE expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(self.now_millis())
        .execute(&self.pool)
        .await
        .map_err(backend)?
        .rows_affected();

        debug!(event_name = "cache.sqlite.purged", removed, "expired cache entries purged");
        Ok(removed)
    }

    /// Live entries only.
    pub async fn entry_count(&self) -> Result<u64, CacheError> {
        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM response_cache WHERE expires_at IS NULL OR expires_at > ?",
        )
        .bind(self.now_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?
        .get::<i64, _>("count");

        Ok(count.max(0) as u64)
    }
}

fn backend(error: sqlx::Error) -> CacheError {
    CacheError::Backend(error.to_string())
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let row = sqlx::query("SELECT payload, expires_at FROM response_cache WHERE cache_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at = row.try_get::<Option<i64>, _>("expires_at").map_err(backend)?;
        if expires_at.is_some_and(|expires_at| expires_at <= self.now_millis()) {
            sqlx::query("DELETE FROM response_cache WHERE cache_key = ? AND expires_at = ?")
                .bind(key)
                .bind(expires_at)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
            return Ok(None);
        }

        row.try_get::<Vec<u8>, _>("payload").map(Some).map_err(backend)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError> {
        let now = self.clock.now();
        let expires_at = expires_at(now, ttl).map(|expires_at| expires_at.timestamp_millis());

        sqlx::query(
            r#"
            INSERT INTO response_cache (cache_key, payload, stored_at, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                payload = excluded.payload,
                stored_at = excluded.stored_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now.timestamp_millis())
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let removed = sqlx::query("DELETE FROM response_cache WHERE substr(cache_key, 1, length(?)) = ?")
            .bind(prefix)
            .bind(prefix)
            .execute(&self.pool)
            .await
            .map_err(backend)?
            .rows_affected();

        Ok(removed)
    }

    async fn flush(&self) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM response_cache").execute(&self.pool).await.map_err(backend)?;
        Ok(())
    }
}
