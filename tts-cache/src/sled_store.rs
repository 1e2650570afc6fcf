use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use tts_core::VariantHash;

use crate::error::{CacheError, CacheResult};
use crate::store::{CacheCapabilities, CachedVariant, VariantCache};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VariantMeta {
    codec: String,
    duration_ms: u32,
    created_at_ms: i64,
    last_accessed_ms: i64,
}

/// sled-backed content-addressed variant store, grounded on `dog_blob::
/// store::BlobStore` (trait shape), `other_examples/...voice_queue.rs.rs::
/// add_to_cache` (LRU-with-pin eviction policy), and `dog_queue::backend::
/// memory::reaper.rs` (periodic-flush background loop idiom).
///
/// Last-accessed timestamps are coalesced in `pending_access` and flushed
/// to the `meta` tree every `flush_interval` rather than written on every
/// `get` — spec.md §4.4 calls out that per-read sled writes would make
/// cache hits as slow as a miss.
pub struct SledVariantCache {
    blobs: sled::Tree,
    meta: sled::Tree,
    lru: Mutex<LruCache<VariantHash, ()>>,
    pinned: DashSet<VariantHash>,
    pending_access: DashMap<VariantHash, i64>,
    /// Running total of blob bytes on disk, maintained incrementally so
    /// `evict_lru`'s size check doesn't have to scan `blobs` on every call.
    total_bytes: AtomicU64,
}

impl SledVariantCache {
    pub fn open(path: &str, capacity: usize) -> CacheResult<Self> {
        let db = sled::open(path)?;
        let blobs = db.open_tree("blobs")?;
        let meta = db.open_tree("meta")?;

        let mut seed: Vec<(VariantHash, i64)> = Vec::new();
        for item in meta.iter() {
            let (key, value) = item?;
            let hash = VariantHash::from_string(String::from_utf8_lossy(&key).into_owned());
            if let Ok(parsed) = serde_json::from_slice::<VariantMeta>(&value) {
                seed.push((hash, parsed.last_accessed_ms));
            }
        }
        seed.sort_by_key(|(_, last_accessed)| *last_accessed);

        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is nonzero");
        let mut lru = LruCache::new(capacity);
        for (hash, _) in seed {
            lru.put(hash, ());
        }

        let total_bytes: u64 = blobs.iter().values().filter_map(Result::ok).map(|v| v.len() as u64).sum();

        info!(entries = lru.len(), total_bytes, "sled variant cache opened");
        Ok(Self {
            blobs,
            meta,
            lru: Mutex::new(lru),
            pinned: DashSet::new(),
            pending_access: DashMap::new(),
            total_bytes: AtomicU64::new(total_bytes),
        })
    }

    /// Spawn the background task that flushes coalesced last-accessed
    /// timestamps into the `meta` tree.
    pub fn spawn_flush_loop(self: Arc<Self>, flush_interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.flush_pending_access() {
                    warn!(%err, "failed to flush variant cache access times");
                }
            }
        })
    }

    fn flush_pending_access(&self) -> CacheResult<()> {
        let pending: Vec<(VariantHash, i64)> = self
            .pending_access
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        for (hash, last_accessed_ms) in &pending {
            if let Some(raw) = self.meta.get(hash.as_str())? {
                let mut parsed: VariantMeta = serde_json::from_slice(&raw)?;
                parsed.last_accessed_ms = *last_accessed_ms;
                self.meta.insert(hash.as_str(), serde_json::to_vec(&parsed)?)?;
            }
            self.pending_access.remove(hash);
        }
        debug!(flushed = pending.len(), "flushed variant cache access times");
        Ok(())
    }

    /// Remove a variant's blob, metadata and bookkeeping entries, and
    /// account its bytes out of `total_bytes`. Does not touch `lru` or
    /// `pinned` — callers that pop/push the LRU themselves.
    fn remove_entry(&self, hash: &VariantHash) -> CacheResult<()> {
        if let Some(removed) = self.blobs.remove(hash.as_str())? {
            self.total_bytes.fetch_sub(removed.len() as u64, Ordering::Relaxed);
        }
        self.meta.remove(hash.as_str())?;
        self.pending_access.remove(hash);
        Ok(())
    }
}

#[async_trait]
impl VariantCache for SledVariantCache {
    #[instrument(skip(self))]
    async fn get(&self, variant_hash: &VariantHash) -> CacheResult<Option<CachedVariant>> {
        let Some(audio_ivec) = self.blobs.get(variant_hash.as_str())? else {
            return Ok(None);
        };
        let Some(meta_ivec) = self.meta.get(variant_hash.as_str())? else {
            return Err(CacheError::not_found(variant_hash.as_str()));
        };
        let meta: VariantMeta = serde_json::from_slice(&meta_ivec)?;

        self.lru.lock().promote(variant_hash);
        self.pending_access
            .insert(variant_hash.clone(), Utc::now().timestamp_millis());

        Ok(Some(CachedVariant {
            audio: Bytes::copy_from_slice(&audio_ivec),
            codec: meta.codec,
            duration_ms: meta.duration_ms,
            created_at_ms: meta.created_at_ms,
        }))
    }

    async fn exists(&self, variant_hash: &VariantHash) -> CacheResult<bool> {
        Ok(self.blobs.contains_key(variant_hash.as_str())?)
    }

    #[instrument(skip(self, audio))]
    async fn put(
        &self,
        variant_hash: &VariantHash,
        audio: Bytes,
        codec: &str,
        duration_ms: u32,
    ) -> CacheResult<()> {
        let now = Utc::now().timestamp_millis();
        let meta = VariantMeta {
            codec: codec.to_string(),
            duration_ms,
            created_at_ms: now,
            last_accessed_ms: now,
        };
        let new_len = audio.len() as u64;
        let previous = self.blobs.insert(variant_hash.as_str(), audio.to_vec())?;
        self.meta
            .insert(variant_hash.as_str(), serde_json::to_vec(&meta)?)?;
        let previous_len = previous.map(|v| v.len() as u64).unwrap_or(0);
        self.total_bytes.fetch_add(new_len, Ordering::Relaxed);
        if previous_len > 0 {
            self.total_bytes.fetch_sub(previous_len, Ordering::Relaxed);
        }

        // `push`, unlike `put`, reports the entry it displaced so we can
        // keep `blobs`/`meta`/`pending_access`/`total_bytes` in step with
        // whatever the bounded in-memory LRU actually dropped.
        if let Some((evicted_hash, ())) = self.lru.lock().push(variant_hash.clone(), ()) {
            if evicted_hash != *variant_hash {
                self.remove_entry(&evicted_hash)?;
            }
        }
        Ok(())
    }

    async fn pin(&self, variant_hash: &VariantHash) -> CacheResult<()> {
        self.pinned.insert(variant_hash.clone());
        Ok(())
    }

    async fn unpin(&self, variant_hash: &VariantHash) -> CacheResult<()> {
        self.pinned.remove(variant_hash);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn evict_lru(&self, target_size: u64) -> CacheResult<Vec<VariantHash>> {
        let mut evicted = Vec::new();
        loop {
            if self.total_bytes.load(Ordering::Relaxed) <= target_size {
                break;
            }
            let victim = {
                let mut lru = self.lru.lock();
                let mut skipped = Vec::new();
                let mut found = None;
                while let Some((hash, _)) = lru.pop_lru() {
                    if self.pinned.contains(&hash) {
                        skipped.push(hash);
                        continue;
                    }
                    found = Some(hash);
                    break;
                }
                for hash in skipped {
                    lru.put(hash, ());
                }
                found
            };
            let Some(hash) = victim else {
                // everything left is pinned; can't reclaim further
                break;
            };
            self.remove_entry(&hash)?;
            debug!(variant_hash = %hash, "evicted variant from cache");
            evicted.push(hash);
        }
        Ok(evicted)
    }

    fn capabilities(&self) -> CacheCapabilities {
        CacheCapabilities {
            supports_pinning: true,
            supports_lru_eviction: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_cache() -> (tempfile::TempDir, SledVariantCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = SledVariantCache::open(dir.path().to_str().unwrap(), 2).unwrap();
        (dir, cache)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (_dir, cache) = open_test_cache();
        let hash = VariantHash::from_string("h1");
        cache
            .put(&hash, Bytes::from_static(b"audio-bytes"), "mp3", 1200)
            .await
            .unwrap();

        let variant = cache.get(&hash).await.unwrap().unwrap();
        assert_eq!(variant.audio, Bytes::from_static(b"audio-bytes"));
        assert_eq!(variant.codec, "mp3");
    }

    #[tokio::test]
    async fn pinned_entries_survive_eviction() {
        let (_dir, cache) = open_test_cache();
        let pinned = VariantHash::from_string("pinned");
        let evictable = VariantHash::from_string("evictable");

        cache.put(&pinned, Bytes::from_static(b"a"), "mp3", 100).await.unwrap();
        cache.pin(&pinned).await.unwrap();
        cache.put(&evictable, Bytes::from_static(b"b"), "mp3", 100).await.unwrap();

        let victims = cache.evict_lru(0).await.unwrap();
        assert_eq!(victims, vec![evictable]);
        assert!(cache.exists(&pinned).await.unwrap());
    }

    #[tokio::test]
    async fn missing_variant_is_none() {
        let (_dir, cache) = open_test_cache();
        let hash = VariantHash::from_string("missing");
        assert!(cache.get(&hash).await.unwrap().is_none());
    }
}
