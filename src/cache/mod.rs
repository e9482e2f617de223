//! Per-user image list cache.
//!
//! The cache maps a user id to a serialized snapshot of that user's image
//! list. It is consulted cache-aside: callers check it, fall back to the
//! metadata store on a miss and `put` the result themselves, and `invalidate`
//! after any committed write that changes the user's image set.
//!
//! Entries are advisory. Every backend error surfaces as [`CacheError`] so the
//! caller can degrade to a miss instead of failing the request.

mod memory;
mod sqlite;

pub use memory::MemoryImageCache;
pub use sqlite::SqliteImageCache;

use crate::models::image::Image;
use async_trait::async_trait;
use bytes::Bytes;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

/// Default lifetime of a cached image list, in seconds.
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Default lifetime of a cached image list.
pub const DEFAULT_TTL: Duration = Duration::from_secs(DEFAULT_TTL_SECS);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("cached snapshot could not be encoded or decoded: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("ttl {0:?} is out of range")]
    InvalidTtl(Duration),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-aside store of per-user image lists.
///
/// Operations on different users never block each other. Operations on the
/// same user are individually atomic: a `get` sees either a whole snapshot or
/// none, never a partially written one.
#[async_trait]
pub trait ImageCache: Send + Sync + 'static {
    /// Return the snapshot for `user_id` if present and unexpired.
    async fn get(&self, user_id: &str) -> CacheResult<Option<Vec<Image>>>;

    /// Store `images` for `user_id`, replacing any existing entry, expiring
    /// `ttl` from now.
    async fn put(&self, user_id: &str, images: &[Image], ttl: Duration) -> CacheResult<()>;

    /// Drop any entry for `user_id`. A no-op when none exists.
    async fn invalidate(&self, user_id: &str) -> CacheResult<()>;

    /// Drop every expired entry and return how many were removed.
    async fn purge_expired(&self) -> CacheResult<u64>;

    /// Cheap reachability probe used by readiness checks.
    async fn ping(&self) -> CacheResult<()>;
}

/// Periodically purge expired entries until the task is aborted.
pub fn spawn_sweeper(cache: Arc<dyn ImageCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match cache.purge_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::debug!("purged {} expired image list entries", n),
                Err(err) => tracing::warn!("cache sweep failed: {}", err),
            }
        }
    })
}

/// Serialize an image list into the opaque snapshot format.
pub fn encode_snapshot(images: &[Image]) -> CacheResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(images)?))
}

/// Inverse of [`encode_snapshot`]. Order and field values are preserved.
pub fn decode_snapshot(payload: &[u8]) -> CacheResult<Vec<Image>> {
    Ok(serde_json::from_slice(payload)?)
}
