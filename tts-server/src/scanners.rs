//! Visibility scanner (spec.md §4.7) and overflow scanner (spec.md §4.8):
//! two independent `tokio::time::interval` background loops, grounded on
//! `dog-queue/src/backend/memory/reaper.rs`'s `LeaseReaper::start` idiom.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{info, instrument, warn};

use tts_cache::VariantCache;
use tts_core::wire::{ResultOutcome, ResultRecord};
use tts_queue::QueueBackend;
use tts_worker::ModelAdapter;

/// Runs `requeue_stale` for one model on a fixed cadence. One instance per
/// model, same as the worker loops — a deployment spawns one per entry in
/// its model registry.
pub struct VisibilityScanner {
    model: String,
    queue: Arc<dyn QueueBackend>,
    scan_interval: Duration,
    max_retries: u32,
}

impl VisibilityScanner {
    pub fn new(model: impl Into<String>, queue: Arc<dyn QueueBackend>, scan_interval: Duration, max_retries: u32) -> Self {
        Self {
            model: model.into(),
            queue,
            scan_interval,
            max_retries,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.scan_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.scan_once().await {
                warn!(model = %self.model, %err, "visibility scan failed");
            }
        }
    }

    #[instrument(skip(self), fields(model = %self.model))]
    async fn scan_once(&self) -> anyhow::Result<()> {
        let moved = self.queue.requeue_stale(&self.model, self.max_retries).await?;
        if !moved.is_empty() {
            info!(model = %self.model, count = moved.len(), "requeued or dead-lettered stale leases");
        }
        Ok(())
    }
}

/// Spills backlog older than a threshold to a serverless adapter (spec.md
/// §4.8). There is no "peek without claiming" primitive on [`QueueBackend`]
/// — this scanner claims the oldest job on the queue the same way a normal
/// worker would, under a short, nominal lease, and inspects its age:
///
/// - old enough: dispatch it through the overflow adapter now.
/// - not old enough: the queue isn't actually backlogged, just happened to
///   have this job next. Leave the short lease alone; either the model's
///   own worker claims it first (the overflow lease is short specifically
///   so it doesn't compete for long), or it expires and the visibility
///   scanner's `requeue_stale` puts it back — at the cost of one extra
///   retry-count increment, an acceptable imprecision of peeking via claim.
pub struct OverflowScanner {
    model: String,
    queue: Arc<dyn QueueBackend>,
    overflow_adapter: Arc<dyn ModelAdapter>,
    scan_interval: Duration,
    overflow_threshold: Duration,
    claim_lease: Duration,
}

impl OverflowScanner {
    pub fn new(
        model: impl Into<String>,
        queue: Arc<dyn QueueBackend>,
        overflow_adapter: Arc<dyn ModelAdapter>,
        scan_interval: Duration,
        overflow_threshold: Duration,
    ) -> Self {
        Self {
            model: model.into(),
            queue,
            overflow_adapter,
            scan_interval,
            overflow_threshold,
            claim_lease: Duration::from_secs(2),
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.scan_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.scan_once().await {
                warn!(model = %self.model, %err, "overflow scan failed");
            }
        }
    }

    #[instrument(skip(self), fields(model = %self.model))]
    async fn scan_once(&self) -> anyhow::Result<()> {
        let Some(leased) = self.queue.claim(&self.model, self.claim_lease).await? else {
            return Ok(());
        };

        let job = leased.job().clone();
        let age = chrono::Utc::now().timestamp_millis() - job.created_at_ms;
        if age < self.overflow_threshold.as_millis() as i64 {
            // Not backlogged; let the short lease expire so a normal
            // worker (or the visibility scanner) reclaims it.
            return Ok(());
        }

        info!(job_id = %job.job_id, age_ms = age, "spilling backlogged job to overflow adapter");
        let result = match self.overflow_adapter.synthesize(&job.text, &job.voice, &job.voice_params).await {
            Ok(synth) => ResultRecord {
                job_id: job.job_id.clone(),
                variant_hash: job.variant_hash.clone(),
                user_id: job.user_id.clone(),
                document_id: job.document_id.clone(),
                block_idx: job.block_idx,
                model: job.model.clone(),
                voice: job.voice.clone(),
                usage_multiplier: job.usage_multiplier,
                text_length: job.text.len() as u32,
                outcome: ResultOutcome::Audio {
                    audio_b64: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &synth.audio),
                    codec: synth.codec,
                    duration_ms: synth.duration_ms,
                },
            },
            Err(err) if err.kind == tts_worker::FailureKind::Transient => {
                // Leave the lease for the visibility scanner to requeue;
                // the overflow path gets exactly one attempt per scan.
                warn!(job_id = %job.job_id, %err, "overflow adapter transient failure, leaving lease to expire");
                return Ok(());
            }
            Err(err) => ResultRecord {
                job_id: job.job_id.clone(),
                variant_hash: job.variant_hash.clone(),
                user_id: job.user_id.clone(),
                document_id: job.document_id.clone(),
                block_idx: job.block_idx,
                model: job.model.clone(),
                voice: job.voice.clone(),
                usage_multiplier: job.usage_multiplier,
                text_length: job.text.len() as u32,
                outcome: ResultOutcome::Error {
                    error_code: err.code.clone(),
                    error_message: err.message.clone(),
                },
            },
        };

        self.queue.push_result(&result).await?;
        self.queue.complete(&leased.entry.job_id, &leased.lease_token).await?;
        Ok(())
    }
}

/// Drives [`VariantCache::evict_lru`] on a fixed cadence (spec.md §4.1):
/// the cache itself only tracks size passively, so something has to poll
/// it against the configured budget and evict down to it.
pub struct CacheReclaimer {
    cache: Arc<dyn VariantCache>,
    reclaim_interval: Duration,
    target_size: u64,
}

impl CacheReclaimer {
    pub fn new(cache: Arc<dyn VariantCache>, reclaim_interval: Duration, target_size: u64) -> Self {
        Self {
            cache,
            reclaim_interval,
            target_size,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.reclaim_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.reclaim_once().await {
                warn!(%err, "cache reclaim failed");
            }
        }
    }

    #[instrument(skip(self))]
    async fn reclaim_once(&self) -> anyhow::Result<()> {
        let evicted = self.cache.evict_lru(self.target_size).await?;
        if !evicted.is_empty() {
            info!(count = evicted.len(), "evicted variants to stay under cache size budget");
        }
        Ok(())
    }
}
