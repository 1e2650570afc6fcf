//! Conformance suite for [`QueueBackend`] implementations, grounded on
//! `tts-queue`'s own in-crate `backend::memory::tests` module but exercised
//! against every backend this crate ships rather than just `MemoryBackend`.
//! `MemoryBackend` always runs; `RedisBackend` only runs under
//! `--features redis-tests` against a real Redis reachable at
//! `TTS_TEST_REDIS_URL` (defaults to `redis://127.0.0.1/`).

use std::collections::BTreeMap;
use std::time::Duration;

use tts_core::wire::{compute_variant_hash, JobRecord as Job};
use tts_core::{DocumentId, JobId, ModelSlug, UserId};
use tts_queue::{JobStatus, MemoryBackend, QueueBackend};

#[cfg(feature = "redis-tests")]
use tts_queue::RedisBackend;

fn test_job(model: &str, logical_key_suffix: &str) -> Job {
    let model_slug = ModelSlug::from(model);
    let variant_hash = compute_variant_hash(
        &format!("hello {logical_key_suffix}"),
        &model_slug,
        "voice_a",
        &Default::default(),
    );
    Job {
        job_id: JobId::new(),
        user_id: UserId::from_string("u1"),
        document_id: DocumentId::from_string(format!("doc_{logical_key_suffix}")),
        block_idx: 0,
        text: format!("hello {logical_key_suffix}"),
        model: model_slug,
        voice: "voice_a".to_string(),
        voice_params: BTreeMap::new(),
        variant_hash,
        usage_multiplier: 1.0,
        created_at_ms: 0,
        retry_count: 0,
    }
}

async fn enqueue_then_claim_round_trips(backend: &dyn QueueBackend) {
    let job = test_job("kokoro", "a");
    let job_id = backend.enqueue_if_new(job, 0).await.unwrap().unwrap();

    let leased = backend.claim("kokoro", Duration::from_secs(60)).await.unwrap().unwrap();
    assert_eq!(leased.job_id(), &job_id);

    let completed = backend.complete(&job_id, &leased.lease_token).await.unwrap();
    assert!(completed);
    assert!(backend.get_entry(&job_id).await.unwrap().is_none());
}

async fn duplicate_variant_is_deduplicated(backend: &dyn QueueBackend) {
    let job_a = test_job("kokoro", "dup");
    let job_b = test_job("kokoro", "dup");

    let first = backend.enqueue_if_new(job_a, 0).await.unwrap();
    assert!(first.is_some());
    let second = backend.enqueue_if_new(job_b, 0).await.unwrap();
    assert!(second.is_none());
}

async fn requeue_stale_respects_max_retries(backend: &dyn QueueBackend) {
    let job = test_job("kokoro", "b");
    let job_id = backend.enqueue_if_new(job, 0).await.unwrap().unwrap();
    let leased = backend.claim("kokoro", Duration::from_millis(1)).await.unwrap().unwrap();
    assert_eq!(leased.job_id(), &job_id);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let moved = backend.requeue_stale("kokoro", 3).await.unwrap();
    assert_eq!(moved, vec![job_id.clone()]);

    let entry = backend.get_entry(&job_id).await.unwrap().unwrap();
    assert!(matches!(entry.status, JobStatus::Retrying { .. }));
}

async fn evict_logical_key_removes_queued_jobs(backend: &dyn QueueBackend) {
    let job = test_job("kokoro", "c");
    let logical_key = job.logical_key();
    backend.enqueue_if_new(job, 0).await.unwrap();

    let evicted = backend.evict_logical_key("kokoro", &logical_key).await.unwrap();
    assert_eq!(evicted.len(), 1);
    assert!(backend.claim("kokoro", Duration::from_secs(60)).await.unwrap().is_none());
}

async fn delete_inflight_if_owner_guards_ownership(backend: &dyn QueueBackend) {
    let job = test_job("kokoro", "d");
    let variant_hash = job.variant_hash.clone();
    let job_id = backend.enqueue_if_new(job, 0).await.unwrap().unwrap();

    // A second identical request is deduplicated while the gate is live.
    assert!(backend.enqueue_if_new(test_job("kokoro", "d"), 0).await.unwrap().is_none());

    // A stale owner can't clear a gate it no longer holds.
    let stale_owner = JobId::new();
    assert!(!backend.delete_inflight_if_owner(&variant_hash, &stale_owner).await.unwrap());

    assert!(backend.delete_inflight_if_owner(&variant_hash, &job_id).await.unwrap());

    // Gate is clear now, so an identical request enqueues again.
    assert!(backend.enqueue_if_new(test_job("kokoro", "d"), 0).await.unwrap().is_some());
}

#[tokio::test]
async fn memory_backend_enqueue_then_claim_round_trips() {
    enqueue_then_claim_round_trips(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn memory_backend_duplicate_variant_is_deduplicated() {
    duplicate_variant_is_deduplicated(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn memory_backend_requeue_stale_respects_max_retries() {
    requeue_stale_respects_max_retries(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn memory_backend_evict_logical_key_removes_queued_jobs() {
    evict_logical_key_removes_queued_jobs(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn memory_backend_delete_inflight_if_owner_guards_ownership() {
    delete_inflight_if_owner_guards_ownership(&MemoryBackend::new()).await;
}

#[cfg(feature = "redis-tests")]
mod redis_conformance {
    use super::*;

    async fn connect() -> RedisBackend {
        let redis_url = std::env::var("TTS_TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        RedisBackend::connect(&redis_url, Duration::from_secs(300))
            .await
            .expect("a redis instance must be reachable at TTS_TEST_REDIS_URL to run redis-tests")
    }

    #[tokio::test]
    async fn redis_backend_enqueue_then_claim_round_trips() {
        enqueue_then_claim_round_trips(&connect().await).await;
    }

    #[tokio::test]
    async fn redis_backend_duplicate_variant_is_deduplicated() {
        duplicate_variant_is_deduplicated(&connect().await).await;
    }

    #[tokio::test]
    async fn redis_backend_requeue_stale_respects_max_retries() {
        requeue_stale_respects_max_retries(&connect().await).await;
    }

    #[tokio::test]
    async fn redis_backend_evict_logical_key_removes_queued_jobs() {
        evict_logical_key_removes_queued_jobs(&connect().await).await;
    }

    #[tokio::test]
    async fn redis_backend_delete_inflight_if_owner_guards_ownership() {
        delete_inflight_if_owner_guards_ownership(&connect().await).await;
    }
}
