pub mod memory;
pub mod redis_backend;

use async_trait::async_trait;
use futures_core::Stream;
use std::pin::Pin;
use std::time::Duration;

use tts_core::wire::{JobRecord as Job, ResultRecord};
use tts_core::{JobId, LeaseToken, VariantHash};

use crate::error::QueueResult;
use crate::observability::MetricsSnapshot;
use crate::types::{JobEvent, LeasedJob, QueueCapabilities, QueueEntry};

/// Type alias for boxed streams (stable Rust compatible).
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Backend trait for the five atomic primitives of spec.md §4.2, realized
/// as Redis Lua scripts in [`redis_backend`] and as an in-process `DashMap`
/// store in [`memory`] for tests. Every primitive must be atomic with
/// respect to concurrent callers on the same model queue; the Redis
/// implementation gets this from single-threaded script execution, the
/// memory implementation from `DashMap`'s per-shard locking plus a
/// per-model `parking_lot::Mutex` around the claim/requeue scan.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Push a job onto `queue:{model}` unless its `variant_hash` already has
    /// a live `inflight:{variant_hash}` gate. Returns `None` when the job
    /// was deduplicated against an in-flight job rather than enqueued.
    async fn enqueue_if_new(&self, job: Job, priority_bias_ms: i64) -> QueueResult<Option<JobId>>;

    /// Pop the oldest eligible job from `queue:{model}`, move it into
    /// `processing:{model}` scored by claim deadline (`now + lease_for`),
    /// and hand back a fresh lease token.
    async fn claim(&self, model: &str, lease_for: Duration) -> QueueResult<Option<LeasedJob>>;

    /// Remove a leased job from `processing:{model}`, `jobs`, and `index`,
    /// but only if `lease_token` still matches the current owner. Returns
    /// `Ok(false)` (not an error) if the lease had already been reclaimed by
    /// a visibility-timeout requeue before this call landed.
    async fn complete(&self, job_id: &JobId, lease_token: &LeaseToken) -> QueueResult<bool>;

    /// Scan `processing:{model}` for leases whose claim deadline has
    /// passed and move them back onto `queue:{model}` with `attempt + 1`,
    /// or onto `dlq:{model}` once `attempt >= max_retries`. Returns the ids
    /// of every job that was moved.
    async fn requeue_stale(&self, model: &str, max_retries: u32) -> QueueResult<Vec<JobId>>;

    /// Remove the `inflight:{variant_hash}` dedup gate, but only if it
    /// still names `job_id` as owner — guards against clearing a gate a
    /// later enqueue has since taken over.
    async fn delete_inflight_if_owner(
        &self,
        variant_hash: &VariantHash,
        job_id: &JobId,
    ) -> QueueResult<bool>;

    /// Evict every job still sitting in `queue:{model}` for a logical key
    /// (not yet claimed) — used by `cursor_moved` to drop blocks that have
    /// scrolled out of the client's retention window.
    async fn evict_logical_key(&self, model: &str, logical_key: &str) -> QueueResult<Vec<JobId>>;

    async fn get_entry(&self, job_id: &JobId) -> QueueResult<Option<QueueEntry>>;

    /// Push a finished job's outcome onto the `results` list (hot path:
    /// drives client notification).
    async fn push_result(&self, record: &ResultRecord) -> QueueResult<()>;

    /// Drain up to `max` entries from the `results` list.
    async fn drain_results(&self, max: usize) -> QueueResult<Vec<ResultRecord>>;

    /// Push a finished job's outcome onto the `billing` list (cold path:
    /// drives usage recording, isolated from the hot path so a slow
    /// billing sink can't add latency to playback).
    async fn push_billing_event(&self, record: &ResultRecord) -> QueueResult<()>;

    /// Drain up to `max` entries from the `billing` list.
    async fn drain_billing_events(&self, max: usize) -> QueueResult<Vec<ResultRecord>>;

    /// Structured observability events (enqueue/claim/complete/requeue/
    /// evict), consumed by `tts-server`'s metrics/logging wiring.
    fn event_stream(&self) -> BoxStream<JobEvent>;

    fn capabilities(&self) -> QueueCapabilities;

    /// Point-in-time counters for the primitives above (`LiveMetrics`),
    /// consumed by `tts-server`'s status endpoint.
    fn metrics(&self) -> MetricsSnapshot;
}
