use async_trait::async_trait;
use bytes::Bytes;

use tts_core::VariantHash;

use crate::error::CacheResult;

/// A cached synthesis variant: the raw audio bytes plus enough metadata to
/// serve it without a round-trip to the worker that produced it.
#[derive(Debug, Clone)]
pub struct CachedVariant {
    pub audio: Bytes,
    pub codec: String,
    pub duration_ms: u32,
    pub created_at_ms: i64,
}

/// What a cache backend can do, grounded on `dog_blob::store::
/// StoreCapabilities`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheCapabilities {
    pub supports_pinning: bool,
    pub supports_lru_eviction: bool,
}

/// Content-addressed variant storage, grounded on `dog_blob::store::
/// BlobStore` but keyed by `VariantHash` rather than an opaque blob id,
/// and with no multipart/range-upload surface since a synthesized block
/// is always written in one shot.
#[async_trait]
pub trait VariantCache: Send + Sync {
    /// Look up a cached variant, bumping its recency for LRU purposes.
    async fn get(&self, variant_hash: &VariantHash) -> CacheResult<Option<CachedVariant>>;

    async fn exists(&self, variant_hash: &VariantHash) -> CacheResult<bool>;

    /// Store a freshly synthesized variant. Overwrites silently if the
    /// hash already exists (same content by construction).
    async fn put(
        &self,
        variant_hash: &VariantHash,
        audio: Bytes,
        codec: &str,
        duration_ms: u32,
    ) -> CacheResult<()>;

    /// Exempt a variant from LRU eviction — used for blocks inside the
    /// client's retention window (spec.md §4.4).
    async fn pin(&self, variant_hash: &VariantHash) -> CacheResult<()>;

    async fn unpin(&self, variant_hash: &VariantHash) -> CacheResult<()>;

    /// Drop unpinned entries in oldest-first order until the store is at
    /// or under `target_size` bytes (spec.md §4.1), returning the hashes
    /// evicted. Called by the cache's background reclaim loop; its
    /// contract only guarantees a new steady-state size bound, not that
    /// every call reaches `target_size` (entries may all be pinned).
    async fn evict_lru(&self, target_size: u64) -> CacheResult<Vec<VariantHash>>;

    fn capabilities(&self) -> CacheCapabilities;
}
