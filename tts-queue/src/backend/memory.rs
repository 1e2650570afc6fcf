use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use tts_core::wire::{JobRecord as Job, ResultRecord};
use tts_core::{JobId, LeaseToken, VariantHash};

use crate::backend::{BoxStream, QueueBackend};
use crate::error::{QueueError, QueueResult};
use crate::observability::{LiveMetrics, MetricsSnapshot};
use crate::types::{JobEvent, LeasedJob, QueueCapabilities, QueueEntry};

type ScoredQueue = Mutex<BTreeMap<i64, JobId>>;

/// In-process backend for tests, grounded on `dog_queue::backend::memory::
/// storage::MemoryBackend` but rebuilt around spec.md §4.2's five atomic
/// primitives rather than the teacher's generic enqueue/dequeue/ack set.
/// `queues`/`processing` mirror the Redis sorted sets of the real backend
/// (`queue:{model}`, `processing:{model}`), scored the same way, so tests
/// written against this backend exercise the same ordering semantics.
pub struct MemoryBackend {
    entries: Arc<DashMap<JobId, QueueEntry>>,
    queues: Arc<DashMap<String, ScoredQueue>>,
    processing: Arc<DashMap<String, ScoredQueue>>,
    inflight: Arc<DashMap<VariantHash, JobId>>,
    results: Arc<Mutex<Vec<ResultRecord>>>,
    billing: Arc<Mutex<Vec<ResultRecord>>>,
    events: broadcast::Sender<JobEvent>,
    metrics: LiveMetrics,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            entries: Arc::new(DashMap::new()),
            queues: Arc::new(DashMap::new()),
            processing: Arc::new(DashMap::new()),
            inflight: Arc::new(DashMap::new()),
            results: Arc::new(Mutex::new(Vec::new())),
            billing: Arc::new(Mutex::new(Vec::new())),
            events,
            metrics: LiveMetrics::new(),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn enqueue_if_new(&self, job: Job, priority_bias_ms: i64) -> QueueResult<Option<JobId>> {
        if self.inflight.contains_key(&job.variant_hash) {
            self.metrics.record_deduplicated();
            return Ok(None);
        }
        let job_id = job.job_id.clone();
        let model = job.model.as_str().to_string();
        self.inflight.insert(job.variant_hash.clone(), job_id.clone());
        let now = Utc::now();
        let score = now.timestamp_millis() - priority_bias_ms;
        self.entries.insert(job_id.clone(), QueueEntry::new(job));
        self.queues
            .entry(model.clone())
            .or_insert_with(|| Mutex::new(BTreeMap::new()))
            .lock()
            .insert(score, job_id.clone());
        let _ = self.events.send(JobEvent::Enqueued {
            job_id: job_id.clone(),
            model,
            at: now,
        });
        self.metrics.record_enqueued();
        Ok(Some(job_id))
    }

    async fn claim(&self, model: &str, lease_for: Duration) -> QueueResult<Option<LeasedJob>> {
        let Some(queue) = self.queues.get(model) else {
            return Ok(None);
        };
        let job_id = {
            let mut q = queue.lock();
            let key = q.keys().next().copied();
            key.and_then(|k| q.remove(&k))
        };
        let Some(job_id) = job_id else {
            return Ok(None);
        };
        let now = Utc::now();
        let lease_until = now
            + chrono::Duration::from_std(lease_for)
                .map_err(|e| QueueError::Internal(e.to_string()))?;
        let lease_token = LeaseToken::new();
        let mut entry = self
            .entries
            .get_mut(&job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        entry.start_processing(lease_token.clone(), lease_until);
        self.processing
            .entry(model.to_string())
            .or_insert_with(|| Mutex::new(BTreeMap::new()))
            .lock()
            .insert(lease_until.timestamp_millis(), job_id.clone());
        let _ = self.events.send(JobEvent::Claimed {
            job_id: job_id.clone(),
            lease_until,
            at: now,
        });
        self.metrics.record_claimed();
        Ok(Some(LeasedJob {
            entry: entry.clone(),
            lease_token,
            lease_until,
        }))
    }

    async fn complete(&self, job_id: &JobId, lease_token: &LeaseToken) -> QueueResult<bool> {
        let Some(mut entry) = self.entries.get_mut(job_id) else {
            return Ok(false);
        };
        if entry.lease_token.as_ref() != Some(lease_token) {
            return Ok(false);
        }
        let model = entry.job.model.as_str().to_string();
        if let Some(lease_until) = entry.lease_until {
            if let Some(proc) = self.processing.get(&model) {
                proc.lock().remove(&lease_until.timestamp_millis());
            }
        }
        entry.complete();
        drop(entry);
        self.entries.remove(job_id);
        let _ = self.events.send(JobEvent::Completed {
            job_id: job_id.clone(),
            at: Utc::now(),
        });
        self.metrics.record_completed();
        Ok(true)
    }

    async fn requeue_stale(&self, model: &str, max_retries: u32) -> QueueResult<Vec<JobId>> {
        let now = Utc::now();
        let Some(proc) = self.processing.get(model) else {
            return Ok(Vec::new());
        };
        let expired: Vec<(i64, JobId)> = {
            let p = proc.lock();
            p.range(..now.timestamp_millis())
                .map(|(k, v)| (*k, v.clone()))
                .collect()
        };
        let mut moved = Vec::new();
        for (score, job_id) in expired {
            proc.lock().remove(&score);
            let Some(mut entry) = self.entries.get_mut(&job_id) else {
                continue;
            };
            if entry.can_retry(max_retries) {
                let retry_at = now;
                entry.schedule_retry(retry_at);
                self.queues
                    .entry(model.to_string())
                    .or_insert_with(|| Mutex::new(BTreeMap::new()))
                    .lock()
                    .insert(retry_at.timestamp_millis(), job_id.clone());
                let _ = self.events.send(JobEvent::Requeued {
                    job_id: job_id.clone(),
                    retry_at,
                    attempt: entry.attempt,
                    at: now,
                });
                self.metrics.record_requeued();
            } else {
                let error = "visibility timeout exceeded max retries".to_string();
                let job = entry.job.clone();
                entry.fail(error.clone());
                self.results.lock().push(ResultRecord {
                    job_id: job.job_id.clone(),
                    variant_hash: job.variant_hash.clone(),
                    user_id: job.user_id.clone(),
                    document_id: job.document_id.clone(),
                    block_idx: job.block_idx,
                    model: job.model.clone(),
                    voice: job.voice.clone(),
                    usage_multiplier: job.usage_multiplier,
                    text_length: job.text.len() as u32,
                    outcome: tts_core::wire::ResultOutcome::Error {
                        error_code: "visibility_timeout_exceeded".to_string(),
                        error_message: error.clone(),
                    },
                });
                let _ = self.events.send(JobEvent::DeadLettered {
                    job_id: job_id.clone(),
                    error,
                    at: now,
                });
                self.metrics.record_dead_lettered();
            }
            moved.push(job_id);
        }
        Ok(moved)
    }

    async fn delete_inflight_if_owner(
        &self,
        variant_hash: &VariantHash,
        job_id: &JobId,
    ) -> QueueResult<bool> {
        let owns = self
            .inflight
            .get(variant_hash)
            .map(|owner| &*owner == job_id)
            .unwrap_or(false);
        if owns {
            self.inflight.remove(variant_hash);
        }
        Ok(owns)
    }

    async fn evict_logical_key(&self, model: &str, logical_key: &str) -> QueueResult<Vec<JobId>> {
        let mut evicted = Vec::new();
        if let Some(queue) = self.queues.get(model) {
            let to_remove: Vec<i64> = {
                let q = queue.lock();
                q.iter()
                    .filter(|(_, job_id)| {
                        self.entries
                            .get(*job_id)
                            .map(|e| e.job.logical_key() == logical_key)
                            .unwrap_or(false)
                    })
                    .map(|(k, _)| *k)
                    .collect()
            };
            for k in to_remove {
                let job_id = queue.lock().remove(&k);
                if let Some(job_id) = job_id {
                    if let Some(mut entry) = self.entries.get_mut(&job_id) {
                        let variant_hash = entry.job.variant_hash.clone();
                        entry.evict();
                        drop(entry);
                        let _ = self.delete_inflight_if_owner(&variant_hash, &job_id).await;
                    }
                    let _ = self.events.send(JobEvent::Evicted {
                        job_id: job_id.clone(),
                        at: Utc::now(),
                    });
                    self.metrics.record_evicted();
                    evicted.push(job_id);
                }
            }
        }
        Ok(evicted)
    }

    async fn get_entry(&self, job_id: &JobId) -> QueueResult<Option<QueueEntry>> {
        Ok(self.entries.get(job_id).map(|e| e.clone()))
    }

    async fn push_result(&self, record: &ResultRecord) -> QueueResult<()> {
        self.results.lock().push(record.clone());
        Ok(())
    }

    async fn drain_results(&self, max: usize) -> QueueResult<Vec<ResultRecord>> {
        let mut results = self.results.lock();
        let n = max.min(results.len());
        Ok(results.drain(..n).collect())
    }

    async fn push_billing_event(&self, record: &ResultRecord) -> QueueResult<()> {
        self.billing.lock().push(record.clone());
        Ok(())
    }

    async fn drain_billing_events(&self, max: usize) -> QueueResult<Vec<ResultRecord>> {
        let mut billing = self.billing.lock();
        let n = max.min(billing.len());
        Ok(billing.drain(..n).collect())
    }

    fn event_stream(&self) -> BoxStream<JobEvent> {
        let rx = self.events.subscribe();
        Box::pin(BroadcastStream::new(rx).filter_map(|r| r.ok()))
    }

    fn capabilities(&self) -> QueueCapabilities {
        QueueCapabilities::full()
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tts_core::wire::compute_variant_hash;
    use tts_core::ModelSlug;

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
            user_id: tts_core::UserId::from_string("u1"),
            document_id: tts_core::DocumentId::from_string(format!("doc_{logical_key_suffix}")),
            block_idx: 0,
            text: format!("hello {logical_key_suffix}"),
            model: model_slug,
            voice: "voice_a".to_string(),
            voice_params: Default::default(),
            variant_hash,
            usage_multiplier: 1.0,
            created_at_ms: 0,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn enqueue_then_claim_round_trips() {
        let backend = MemoryBackend::new();
        let job = test_job("kokoro", "a");
        let job_id = backend.enqueue_if_new(job, 0).await.unwrap().unwrap();

        let leased = backend.claim("kokoro", Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(leased.job_id(), &job_id);

        let completed = backend.complete(&job_id, &leased.lease_token).await.unwrap();
        assert!(completed);
        assert!(backend.get_entry(&job_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_variant_is_deduplicated() {
        let backend = MemoryBackend::new();
        let job_a = test_job("kokoro", "dup");
        let job_b = test_job("kokoro", "dup");

        let first = backend.enqueue_if_new(job_a, 0).await.unwrap();
        assert!(first.is_some());
        let second = backend.enqueue_if_new(job_b, 0).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn requeue_stale_respects_max_retries() {
        let backend = MemoryBackend::new();
        let job = test_job("kokoro", "b");
        let job_id = backend.enqueue_if_new(job, 0).await.unwrap().unwrap();
        let leased = backend
            .claim("kokoro", Duration::from_millis(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.job_id(), &job_id);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let moved = backend.requeue_stale("kokoro", 3).await.unwrap();
        assert_eq!(moved, vec![job_id.clone()]);

        let entry = backend.get_entry(&job_id).await.unwrap().unwrap();
        assert!(matches!(entry.status, crate::types::JobStatus::Retrying { .. }));
    }

    #[tokio::test]
    async fn evict_logical_key_removes_queued_jobs() {
        let backend = MemoryBackend::new();
        let job = test_job("kokoro", "c");
        let logical_key = job.logical_key();
        backend.enqueue_if_new(job, 0).await.unwrap();

        let evicted = backend.evict_logical_key("kokoro", &logical_key).await.unwrap();
        assert_eq!(evicted.len(), 1);
        assert!(backend.claim("kokoro", Duration::from_secs(60)).await.unwrap().is_none());
    }
}
