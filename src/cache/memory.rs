use super::{CacheError, CacheResult, ImageCache, decode_snapshot, encode_snapshot};
use crate::models::image::Image;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

#[derive(Clone, Debug)]
struct Entry {
    payload: Bytes,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process cache backed by a sharded concurrent map.
///
/// Snapshots are stored encoded, exactly as the SQLite backend stores them,
/// so both backends exercise the same codec. Each entry is replaced as a
/// whole under its shard lock.
#[derive(Clone, Default)]
pub struct MemoryImageCache {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ImageCache for MemoryImageCache {
    async fn get(&self, user_id: &str) -> CacheResult<Option<Vec<Image>>> {
        let now = Instant::now();
        // The shard guard must be released before `remove_if` takes it again.
        let fresh = match self.entries.get(user_id) {
            Some(entry) if !entry.is_expired(now) => Some(entry.payload.clone()),
            Some(_) => None,
            None => return Ok(None),
        };

        match fresh {
            Some(payload) => decode_snapshot(&payload).map(Some),
            None => {
                // expired: drop it unless a fresh put raced in
                self.entries
                    .remove_if(user_id, |_, entry| entry.is_expired(now));
                Ok(None)
            }
        }
    }

    async fn put(&self, user_id: &str, images: &[Image], ttl: Duration) -> CacheResult<()> {
        let payload = encode_snapshot(images)?;
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or(CacheError::InvalidTtl(ttl))?;
        self.entries
            .insert(user_id.to_string(), Entry { payload, expires_at });
        Ok(())
    }

    async fn invalidate(&self, user_id: &str) -> CacheResult<()> {
        self.entries.remove(user_id);
        Ok(())
    }

    async fn purge_expired(&self) -> CacheResult<u64> {
        let now = Instant::now();
        let mut removed = 0u64;
        self.entries.retain(|_, entry| {
            let expired = entry.is_expired(now);
            removed += u64::from(expired);
            !expired
        });
        Ok(removed)
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }
}
