//! Cache warmer, spec.md §4.9: one-shot, idempotent pre-synthesis of a
//! configured set of showcase content. Grounded on `other_examples/
//! ...voice_queue.rs.rs::pregenerate_npc`'s "enqueue known lines up front,
//! pin the results" shape, rebuilt against this core's own queue/cache
//! primitives rather than that example's direct in-process call.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use tts_cache::VariantCache;
use tts_core::wire::{compute_variant_hash, JobRecord};
use tts_core::{DocumentId, JobId, ModelSlug, UserId};
use tts_queue::types::JobPriority;
use tts_queue::QueueBackend;

/// One piece of showcase content to pre-synthesize and pin.
#[derive(Debug, Clone)]
pub struct WarmTarget {
    pub text: String,
    pub model: String,
    pub voice: String,
}

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Runs the configured warm set to completion, in order. `document_id` and
/// `user_id` are synthetic — warmed content has no real owning document,
/// only a variant hash, so the job record just needs placeholders the
/// queue's bookkeeping accepts.
pub async fn run_warmer(queue: Arc<dyn QueueBackend>, cache: Arc<dyn VariantCache>, targets: &[WarmTarget], wait_timeout: Duration) {
    for target in targets {
        if let Err(err) = warm_one(&queue, &cache, target, wait_timeout).await {
            warn!(model = %target.model, voice = %target.voice, %err, "cache warmer failed for target");
        }
    }
}

async fn warm_one(
    queue: &Arc<dyn QueueBackend>,
    cache: &Arc<dyn VariantCache>,
    target: &WarmTarget,
    wait_timeout: Duration,
) -> anyhow::Result<()> {
    let model_slug: ModelSlug = target.model.as_str().into();
    let params = BTreeMap::new();
    let variant_hash = compute_variant_hash(&target.text, &model_slug, &target.voice, &params);

    if cache.exists(&variant_hash).await? {
        cache.pin(&variant_hash).await?;
        info!(variant_hash = %variant_hash.as_str(), "warm target already cached, pinned");
        return Ok(());
    }

    let job = JobRecord {
        job_id: JobId::new(),
        user_id: UserId::from_string("cache-warmer"),
        document_id: DocumentId::from_string("cache-warmer"),
        block_idx: 0,
        text: target.text.clone(),
        model: model_slug,
        voice: target.voice.clone(),
        voice_params: params,
        variant_hash: variant_hash.clone(),
        usage_multiplier: 1.0,
        created_at_ms: chrono::Utc::now().timestamp_millis(),
        retry_count: 0,
    };

    queue.enqueue_if_new(job, JobPriority::Low.score_bias_ms()).await?;

    let deadline = tokio::time::Instant::now() + wait_timeout;
    while tokio::time::Instant::now() < deadline {
        if cache.exists(&variant_hash).await? {
            cache.pin(&variant_hash).await?;
            info!(variant_hash = %variant_hash.as_str(), "warm target synthesized and pinned");
            return Ok(());
        }
        sleep(POLL_INTERVAL).await;
    }

    anyhow::bail!("timed out waiting for warm target to synthesize");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dashmap::{DashMap, DashSet};
    use tts_cache::{CacheCapabilities, CacheResult, CachedVariant};
    use tts_queue::MemoryBackend;

    #[derive(Default)]
    struct FakeCache {
        blobs: DashMap<tts_core::VariantHash, CachedVariant>,
        pinned: DashSet<tts_core::VariantHash>,
    }

    #[async_trait]
    impl VariantCache for FakeCache {
        async fn get(&self, variant_hash: &tts_core::VariantHash) -> CacheResult<Option<CachedVariant>> {
            Ok(self.blobs.get(variant_hash).map(|v| v.clone()))
        }

        async fn exists(&self, variant_hash: &tts_core::VariantHash) -> CacheResult<bool> {
            Ok(self.blobs.contains_key(variant_hash))
        }

        async fn put(&self, variant_hash: &tts_core::VariantHash, audio: bytes::Bytes, codec: &str, duration_ms: u32) -> CacheResult<()> {
            self.blobs.insert(
                variant_hash.clone(),
                CachedVariant { audio, codec: codec.to_string(), duration_ms, created_at_ms: 0 },
            );
            Ok(())
        }

        async fn pin(&self, variant_hash: &tts_core::VariantHash) -> CacheResult<()> {
            self.pinned.insert(variant_hash.clone());
            Ok(())
        }

        async fn unpin(&self, variant_hash: &tts_core::VariantHash) -> CacheResult<()> {
            self.pinned.remove(variant_hash);
            Ok(())
        }

        async fn evict_lru(&self, _target_size: u64) -> CacheResult<Vec<tts_core::VariantHash>> {
            Ok(Vec::new())
        }

        fn capabilities(&self) -> CacheCapabilities {
            CacheCapabilities { supports_pinning: true, supports_lru_eviction: false }
        }
    }

    fn sample_target() -> WarmTarget {
        WarmTarget { text: "hello there".to_string(), model: "kokoro".to_string(), voice: "af_heart".to_string() }
    }

    #[tokio::test]
    async fn already_cached_target_is_pinned_without_enqueueing() {
        let queue: Arc<dyn QueueBackend> = Arc::new(MemoryBackend::new());
        let cache: Arc<dyn VariantCache> = Arc::new(FakeCache::default());
        let target = sample_target();
        let params = BTreeMap::new();
        let model: ModelSlug = target.model.as_str().into();
        let variant_hash = compute_variant_hash(&target.text, &model, &target.voice, &params);
        cache.put(&variant_hash, bytes::Bytes::from_static(b"x"), "wav", 10).await.unwrap();

        warm_one(&queue, &cache, &target, Duration::from_secs(1)).await.unwrap();

        assert!(queue.claim("kokoro", Duration::from_secs(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn uncached_target_enqueues_and_waits_for_the_variant_to_appear() {
        let queue: Arc<dyn QueueBackend> = Arc::new(MemoryBackend::new());
        let cache: Arc<dyn VariantCache> = Arc::new(FakeCache::default());
        let target = sample_target();
        let params = BTreeMap::new();
        let model: ModelSlug = target.model.as_str().into();
        let variant_hash = compute_variant_hash(&target.text, &model, &target.voice, &params);

        let warm_cache = Arc::clone(&cache);
        let warm_hash = variant_hash.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            warm_cache.put(&warm_hash, bytes::Bytes::from_static(b"x"), "wav", 10).await.unwrap();
        });

        warm_one(&queue, &cache, &target, Duration::from_secs(2)).await.unwrap();
        assert!(cache.exists(&variant_hash).await.unwrap());
    }

    #[tokio::test]
    async fn times_out_when_nothing_ever_synthesizes_the_variant() {
        let queue: Arc<dyn QueueBackend> = Arc::new(MemoryBackend::new());
        let cache: Arc<dyn VariantCache> = Arc::new(FakeCache::default());
        let target = sample_target();

        let result = warm_one(&queue, &cache, &target, Duration::from_millis(50)).await;
        assert!(result.is_err());
    }
}
