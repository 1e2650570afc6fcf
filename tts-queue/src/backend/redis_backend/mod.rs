mod scripts;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{instrument, warn};

use tts_core::wire::{JobRecord as Job, ResultOutcome, ResultRecord};
use tts_core::{JobId, LeaseToken, VariantHash};

use crate::backend::{BoxStream, QueueBackend};
use crate::error::{QueueError, QueueResult};
use crate::observability::{LiveMetrics, MetricsSnapshot};
use crate::types::{JobEvent, LeasedJob, QueueCapabilities, QueueEntry};

const RESULTS_KEY: &str = "results";
const BILLING_KEY: &str = "billing";

fn queue_key(model: &str) -> String {
    format!("queue:{model}")
}

fn processing_key(model: &str) -> String {
    format!("processing:{model}")
}

fn dlq_key(model: &str) -> String {
    format!("dlq:{model}")
}

fn inflight_key(variant_hash: &VariantHash) -> String {
    format!("inflight:{}", variant_hash.as_str())
}

/// Redis-backed `QueueBackend`, grounded on `dog_queue::backend::memory::
/// storage::MemoryBackend`'s shape but implementing spec.md §4.2's five
/// atomic primitives as Lua scripts (`scripts`) against the key layout of
/// §4.2: `queue:{model}` / `processing:{model}` sorted sets, a `jobs` hash
/// of job content, an `index` hash for logical-key eviction lookups, a
/// `leases` hash of current lease-token ownership, per-model `dlq:{model}`
/// lists, and `results`/`billing` lists for the hot/cold consumer split.
pub struct RedisBackend {
    conn: ConnectionManager,
    events: broadcast::Sender<JobEvent>,
    metrics: LiveMetrics,
    /// TTL for the `inflight:{variant_hash}` dedup key (`TtsConfig::
    /// inflight_ttl`), a safety net in case a job is lost without
    /// completing.
    inflight_ttl: Duration,
}

impl RedisBackend {
    pub async fn connect(redis_url: &str, inflight_ttl: Duration) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        let (events, _) = broadcast::channel(1024);
        Ok(Self {
            conn,
            events,
            metrics: LiveMetrics::new(),
            inflight_ttl,
        })
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    #[instrument(skip(self, job))]
    async fn enqueue_if_new(&self, job: Job, priority_bias_ms: i64) -> QueueResult<Option<JobId>> {
        let mut conn = self.conn.clone();
        let model = job.model.as_str().to_string();
        let logical_key = job.logical_key();
        let job_id = job.job_id.clone();
        let variant_hash = job.variant_hash.clone();
        let job_json = serde_json::to_string(&job)?;
        let now = Utc::now();
        let score = now.timestamp_millis() - priority_bias_ms;

        let inserted: i64 = scripts::ENQUEUE_IF_NEW
            .key(queue_key(&model))
            .key("jobs")
            .key("index")
            .key(inflight_key(&variant_hash))
            .arg(job_id.as_str())
            .arg(job_json)
            .arg(score)
            .arg(self.inflight_ttl.as_secs())
            .arg(&logical_key)
            .invoke_async(&mut conn)
            .await?;

        if inserted == 0 {
            self.metrics.record_deduplicated();
            return Ok(None);
        }
        self.emit(JobEvent::Enqueued {
            job_id: job_id.clone(),
            model,
            at: now,
        });
        self.metrics.record_enqueued();
        Ok(Some(job_id))
    }

    #[instrument(skip(self))]
    async fn claim(&self, model: &str, lease_for: Duration) -> QueueResult<Option<LeasedJob>> {
        let mut conn = self.conn.clone();
        let now = Utc::now();
        let lease_until = now
            + chrono::Duration::from_std(lease_for)
                .map_err(|e| QueueError::Internal(e.to_string()))?;
        let lease_token = LeaseToken::new();

        let result: Option<(String, String)> = scripts::CLAIM
            .key(queue_key(model))
            .key(processing_key(model))
            .key("jobs")
            .key("leases")
            .arg(lease_until.timestamp_millis())
            .arg(lease_token.as_str())
            .invoke_async(&mut conn)
            .await?;

        let Some((job_id_raw, job_json)) = result else {
            return Ok(None);
        };
        let job: Job = serde_json::from_str(&job_json)?;
        debug_assert_eq!(job.job_id.as_str(), job_id_raw);
        let mut entry = QueueEntry::new(job);
        entry.start_processing(lease_token.clone(), lease_until);

        self.emit(JobEvent::Claimed {
            job_id: entry.job_id.clone(),
            lease_until,
            at: now,
        });
        self.metrics.record_claimed();
        Ok(Some(LeasedJob {
            entry,
            lease_token,
            lease_until,
        }))
    }

    #[instrument(skip(self))]
    async fn complete(&self, job_id: &JobId, lease_token: &LeaseToken) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let job_json: Option<String> = conn.hget("jobs", job_id.as_str()).await?;
        let Some(job_json) = job_json else {
            return Ok(false);
        };
        let job: Job = serde_json::from_str(&job_json)?;
        let model = job.model.as_str().to_string();
        let logical_key = job.logical_key();

        let ok: i64 = scripts::COMPLETE
            .key(processing_key(&model))
            .key("jobs")
            .key("leases")
            .key("index")
            .arg(job_id.as_str())
            .arg(lease_token.as_str())
            .arg(logical_key)
            .invoke_async(&mut conn)
            .await?;

        if ok == 1 {
            self.emit(JobEvent::Completed {
                job_id: job_id.clone(),
                at: Utc::now(),
            });
            self.metrics.record_completed();
        }
        Ok(ok == 1)
    }

    #[instrument(skip(self))]
    async fn requeue_stale(&self, model: &str, max_retries: u32) -> QueueResult<Vec<JobId>> {
        let mut conn = self.conn.clone();
        let now = Utc::now();
        let stale: Vec<String> = scripts::CLAIM_STALE
            .key(processing_key(model))
            .key("leases")
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        let mut moved = Vec::with_capacity(stale.len());
        for job_id_raw in stale {
            let job_id = JobId::from_string(job_id_raw.clone());
            let attempt: i64 = conn.hincr("attempts", &job_id_raw, 1).await?;

            if (attempt as u32) > max_retries {
                let job_json: Option<String> = conn.hget("jobs", &job_id_raw).await?;
                conn.hdel::<_, _, ()>("jobs", &job_id_raw).await?;
                conn.hdel::<_, _, ()>("attempts", &job_id_raw).await?;
                let error = "visibility timeout exceeded max retries".to_string();
                if let Some(job_json) = job_json {
                    conn.rpush::<_, _, ()>(dlq_key(model), &job_json).await?;
                    if let Ok(job) = serde_json::from_str::<Job>(&job_json) {
                        let result = ResultRecord {
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
                                error_code: "visibility_timeout_exceeded".to_string(),
                                error_message: error.clone(),
                            },
                        };
                        let payload = serde_json::to_string(&result)?;
                        conn.rpush::<_, _, ()>(RESULTS_KEY, payload).await?;
                    }
                }
                self.emit(JobEvent::DeadLettered {
                    job_id: job_id.clone(),
                    error,
                    at: now,
                });
                self.metrics.record_dead_lettered();
            } else {
                let score = now.timestamp_millis();
                conn.zadd::<_, _, _, ()>(queue_key(model), &job_id_raw, score)
                    .await?;
                self.emit(JobEvent::Requeued {
                    job_id: job_id.clone(),
                    retry_at: now,
                    attempt: attempt as u32,
                    at: now,
                });
                self.metrics.record_requeued();
            }
            moved.push(job_id);
        }
        if !moved.is_empty() {
            warn!(count = moved.len(), model, "requeued stale leases");
        }
        Ok(moved)
    }

    #[instrument(skip(self))]
    async fn delete_inflight_if_owner(
        &self,
        variant_hash: &VariantHash,
        job_id: &JobId,
    ) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let ok: i64 = scripts::DELETE_INFLIGHT_IF_OWNER
            .key(inflight_key(variant_hash))
            .arg(job_id.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(ok == 1)
    }

    #[instrument(skip(self))]
    async fn evict_logical_key(&self, model: &str, logical_key: &str) -> QueueResult<Vec<JobId>> {
        let mut conn = self.conn.clone();
        let result: Vec<String> = scripts::EVICT_LOGICAL_KEY
            .key("index")
            .key(queue_key(model))
            .key("jobs")
            .arg(logical_key)
            .invoke_async(&mut conn)
            .await?;
        let Some(job_id_raw) = result.first() else {
            return Ok(Vec::new());
        };
        let job_id = JobId::from_string(job_id_raw.clone());

        // The job is already gone from `queue`/`jobs`/`index`; this caller
        // exclusively owns its cleanup, so the inflight-owner check is safe
        // as a follow-up rather than part of the same script.
        if let Some(job_json) = result.get(1) {
            if let Ok(job) = serde_json::from_str::<Job>(job_json) {
                let _ = self
                    .delete_inflight_if_owner(&job.variant_hash, &job_id)
                    .await;
            }
        }

        self.emit(JobEvent::Evicted {
            job_id: job_id.clone(),
            at: Utc::now(),
        });
        self.metrics.record_evicted();
        Ok(vec![job_id])
    }

    async fn get_entry(&self, job_id: &JobId) -> QueueResult<Option<QueueEntry>> {
        let mut conn = self.conn.clone();
        let job_json: Option<String> = conn.hget("jobs", job_id.as_str()).await?;
        Ok(match job_json {
            Some(json) => {
                let job: Job = serde_json::from_str(&json)?;
                Some(QueueEntry::new(job))
            }
            None => None,
        })
    }

    async fn push_result(&self, record: &ResultRecord) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(record)?;
        conn.rpush::<_, _, ()>(RESULTS_KEY, json).await?;
        Ok(())
    }

    async fn drain_results(&self, max: usize) -> QueueResult<Vec<ResultRecord>> {
        drain_list(&self.conn, RESULTS_KEY, max).await
    }

    async fn push_billing_event(&self, record: &ResultRecord) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(record)?;
        conn.rpush::<_, _, ()>(BILLING_KEY, json).await?;
        Ok(())
    }

    async fn drain_billing_events(&self, max: usize) -> QueueResult<Vec<ResultRecord>> {
        drain_list(&self.conn, BILLING_KEY, max).await
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

async fn drain_list(
    conn: &ConnectionManager,
    key: &str,
    max: usize,
) -> QueueResult<Vec<ResultRecord>> {
    let Some(count) = std::num::NonZeroUsize::new(max) else {
        return Ok(Vec::new());
    };
    let mut conn = conn.clone();
    let raw: Vec<String> = conn.lpop(key, Some(count)).await?;
    raw.into_iter()
        .map(|json| serde_json::from_str(&json).map_err(QueueError::from))
        .collect()
}
