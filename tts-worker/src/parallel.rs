//! Parallel-dispatcher worker loop, spec.md §4.4: for API-bound adapters
//! where concurrency costs nothing but an HTTP connection. Colocated with
//! the orchestrator process; no visibility tracking, since a crash loses
//! in-flight dispatches and the client's reconnect retry re-synthesizes
//! them for free (the dedup gate makes that safe).
//!
//! Grounded on `dog-queue/src/execution/executor.rs`'s `Semaphore` +
//! `DashMap` concurrency-control idiom.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::{instrument, warn};

use tts_core::wire::{ResultOutcome, ResultRecord};
use tts_core::JobId;
use tts_queue::QueueBackend;

use crate::adapter::{FailureKind, ModelAdapter};

const IDLE_POLL: Duration = Duration::from_millis(100);

/// How long a job may sit dispatched before the tracking entry is
/// considered stale and dropped, purely for observability — dispatch
/// itself has no timeout here, since the adapter's own HTTP client owns
/// that.
const IN_FLIGHT_TTL: Duration = Duration::from_secs(600);

pub struct ParallelDispatcher {
    model: String,
    queue: Arc<dyn QueueBackend>,
    adapter: Arc<dyn ModelAdapter>,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<DashMap<JobId, std::time::Instant>>,
}

impl ParallelDispatcher {
    pub fn new(model: impl Into<String>, queue: Arc<dyn QueueBackend>, adapter: Arc<dyn ModelAdapter>, max_concurrency: usize) -> Self {
        Self {
            model: model.into(),
            queue,
            adapter,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Runs forever: claims, spawns a dispatch task, and loops immediately
    /// rather than waiting on the spawned task — the acquired `Semaphore`
    /// permit is what actually bounds concurrency.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.dispatch_next().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(IDLE_POLL).await,
                Err(err) => {
                    warn!(model = %self.model, %err, "parallel dispatcher claim failed");
                    tokio::time::sleep(IDLE_POLL).await;
                }
            }
        }
    }

    #[instrument(skip(self), fields(model = %self.model))]
    async fn dispatch_next(self: &Arc<Self>) -> anyhow::Result<bool> {
        // No visibility timeout on this mode (spec.md §4.4): claim still
        // needs a lease duration argument, so hand it the TTL used purely
        // for the local observability map above.
        let Some(leased) = self.queue.claim(&self.model, IN_FLIGHT_TTL).await? else {
            return Ok(false);
        };

        let permit = self.semaphore.clone().acquire_owned().await?;
        let job = leased.job().clone();
        let this = Arc::clone(self);
        this.in_flight.insert(job.job_id.clone(), std::time::Instant::now());

        tokio::spawn(async move {
            let _permit = permit;
            let result = match this.adapter.synthesize(&job.text, &job.voice, &job.voice_params).await {
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
                        audio_b64: base64::engine::general_purpose::STANDARD.encode(&synth.audio),
                        codec: synth.codec,
                        duration_ms: synth.duration_ms,
                    },
                },
                Err(err) => {
                    if err.kind == FailureKind::Transient {
                        // Leave the lease alone: the visibility scanner will
                        // requeue it for retry once it expires, rather than
                        // completing the job with a permanent error here.
                        warn!(job_id = %job.job_id, %err, "transient adapter failure, leaving lease to expire for retry");
                        this.in_flight.remove(&job.job_id);
                        return;
                    }
                    ResultRecord {
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
                    }
                }
            };

            if let Err(err) = this.queue.push_result(&result).await {
                warn!(job_id = %job.job_id, %err, "failed to push dispatch result");
            }
            if let Err(err) = this.queue.complete(&leased.entry.job_id, &leased.lease_token).await {
                warn!(job_id = %job.job_id, %err, "failed to mark dispatched job complete");
            }
            this.in_flight.remove(&job.job_id);
        });

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use tts_core::{DocumentId, JobId, ModelSlug, UserId, VariantHash};
    use tts_core::wire::JobRecord;
    use tts_queue::MemoryBackend;

    struct EchoAdapter;

    #[async_trait]
    impl ModelAdapter for EchoAdapter {
        async fn synthesize(
            &self,
            text: &str,
            _voice: &str,
            _params: &tts_core::wire::SynthesisParams,
        ) -> Result<Synthesized, crate::adapter::AdapterError> {
            Ok(Synthesized {
                audio: bytes::Bytes::from(text.as_bytes().to_vec()),
                codec: "mp3".to_string(),
                duration_ms: 50,
            })
        }
    }

    struct AlwaysFatalAdapter;

    #[async_trait]
    impl ModelAdapter for AlwaysFatalAdapter {
        async fn synthesize(
            &self,
            _text: &str,
            _voice: &str,
            _params: &tts_core::wire::SynthesisParams,
        ) -> Result<Synthesized, crate::adapter::AdapterError> {
            Err(crate::adapter::AdapterError::fatal("unsupported_voice", "no such voice"))
        }
    }

    struct AlwaysTransientAdapter;

    #[async_trait]
    impl ModelAdapter for AlwaysTransientAdapter {
        async fn synthesize(
            &self,
            _text: &str,
            _voice: &str,
            _params: &tts_core::wire::SynthesisParams,
        ) -> Result<Synthesized, crate::adapter::AdapterError> {
            Err(crate::adapter::AdapterError::transient("upstream_timeout", "api timed out"))
        }
    }

    fn test_job() -> JobRecord {
        let model: ModelSlug = "openai-tts".into();
        JobRecord {
            job_id: JobId::new(),
            user_id: UserId::from_string("user1"),
            document_id: DocumentId::from_string("doc1"),
            block_idx: 0,
            text: "hello from the api".to_string(),
            model: model.clone(),
            voice: "nova".to_string(),
            voice_params: BTreeMap::new(),
            variant_hash: VariantHash::from_string("hash2"),
            usage_multiplier: 1.0,
            created_at_ms: 0,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn dispatch_next_returns_false_on_empty_queue() {
        let queue: Arc<dyn QueueBackend> = Arc::new(MemoryBackend::new());
        let dispatcher = Arc::new(ParallelDispatcher::new("openai-tts", queue, Arc::new(EchoAdapter), 4));
        assert!(!dispatcher.dispatch_next().await.unwrap());
    }

    #[tokio::test]
    async fn dispatch_next_spawns_a_task_that_pushes_a_result() {
        let queue: Arc<dyn QueueBackend> = Arc::new(MemoryBackend::new());
        queue.enqueue_if_new(test_job(), 0).await.unwrap();

        let dispatcher = Arc::new(ParallelDispatcher::new("openai-tts", queue.clone(), Arc::new(EchoAdapter), 4));
        assert!(dispatcher.dispatch_next().await.unwrap());

        // The dispatch is a spawned task; give it a moment to finish.
        for _ in 0..50 {
            if dispatcher.in_flight_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let results = queue.drain_results(10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].outcome, ResultOutcome::Audio { .. }));
    }

    #[tokio::test]
    async fn fatal_adapter_error_still_completes_the_job_with_an_error_result() {
        let queue: Arc<dyn QueueBackend> = Arc::new(MemoryBackend::new());
        queue.enqueue_if_new(test_job(), 0).await.unwrap();

        let dispatcher = Arc::new(ParallelDispatcher::new("openai-tts", queue.clone(), Arc::new(AlwaysFatalAdapter), 4));
        assert!(dispatcher.dispatch_next().await.unwrap());

        for _ in 0..50 {
            if dispatcher.in_flight_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let results = queue.drain_results(10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].outcome, ResultOutcome::Error { .. }));
    }

    #[tokio::test]
    async fn transient_adapter_error_leaves_the_lease_for_the_visibility_scanner() {
        let queue: Arc<dyn QueueBackend> = Arc::new(MemoryBackend::new());
        queue.enqueue_if_new(test_job(), 0).await.unwrap();

        let dispatcher = Arc::new(ParallelDispatcher::new("openai-tts", queue.clone(), Arc::new(AlwaysTransientAdapter), 4));
        assert!(dispatcher.dispatch_next().await.unwrap());

        for _ in 0..50 {
            if dispatcher.in_flight_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // No result pushed and the job never completed: the lease is still
        // live, so a second claim under the same model finds nothing free.
        assert!(queue.drain_results(10).await.unwrap().is_empty());
        assert!(queue.claim("openai-tts", Duration::from_secs(60)).await.unwrap().is_none());
    }
}
