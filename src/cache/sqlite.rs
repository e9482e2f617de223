use super::{CacheError, CacheResult, ImageCache, decode_snapshot, encode_snapshot};
use crate::models::image::Image;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};

/// Cache backed by a dedicated SQLite database.
///
/// Rows survive restarts and are shared by every process that opens the same
/// file. Each `put` is a single upsert statement and each `get` a single
/// select, so a reader never sees a half-written snapshot. Expiry is stored
/// as unix milliseconds and checked on read.
#[derive(Clone)]
pub struct SqliteImageCache {
    db: Arc<SqlitePool>,
}

impl SqliteImageCache {
    /// Wrap a pool whose schema was prepared with
    /// [`crate::db::run_cache_migrations`].
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_millis(ttl: Duration) -> CacheResult<i64> {
    let ttl_chrono = chrono::Duration::from_std(ttl).map_err(|_| CacheError::InvalidTtl(ttl))?;
    Utc::now()
        .checked_add_signed(ttl_chrono)
        .map(|at| at.timestamp_millis())
        .ok_or(CacheError::InvalidTtl(ttl))
}

#[async_trait]
impl ImageCache for SqliteImageCache {
    async fn get(&self, user_id: &str) -> CacheResult<Option<Vec<Image>>> {
        let payload: Option<Vec<u8>> = sqlx::query_scalar(
            "SELECT payload FROM image_cache WHERE user_id = ? AND expires_at > ?",
        )
        .bind(user_id)
        .bind(now_millis())
        .fetch_optional(&*self.db)
        .await?;

        payload
            .map(|bytes| decode_snapshot(&bytes))
            .transpose()
    }

    async fn put(&self, user_id: &str, images: &[Image], ttl: Duration) -> CacheResult<()> {
        let payload = encode_snapshot(images)?;
        let expires_at = expiry_millis(ttl)?;

        sqlx::query(
            "INSERT INTO image_cache (user_id, payload, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                payload = excluded.payload,
                expires_at = excluded.expires_at",
        )
        .bind(user_id)
        .bind(payload.to_vec())
        .bind(expires_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn invalidate(&self, user_id: &str) -> CacheResult<()> {
        sqlx::query("DELETE FROM image_cache WHERE user_id = ?")
            .bind(user_id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> CacheResult<u64> {
        let result = sqlx::query("DELETE FROM image_cache WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> CacheResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}
