//! Serial worker loop, spec.md §4.4: one job monopolizes the adapter at a
//! time (a local GPU process can only run one synthesis at once). Grounded
//! on `dog-queue/src/adapter.rs`'s `QueueAdapter::start_workers` claim/run
//! loop, trimmed of the generic `Job`/tenant machinery this core doesn't
//! need.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use tracing::{instrument, warn};

use tts_core::wire::{ResultOutcome, ResultRecord};
use tts_queue::QueueBackend;

use crate::adapter::{FailureKind, ModelAdapter};

/// Backoff between empty `claim` polls, so an idle model doesn't spin.
const IDLE_POLL: Duration = Duration::from_millis(250);

pub struct SerialWorker {
    model: String,
    queue: Arc<dyn QueueBackend>,
    adapter: Arc<dyn ModelAdapter>,
    visibility_timeout: Duration,
}

impl SerialWorker {
    pub fn new(
        model: impl Into<String>,
        queue: Arc<dyn QueueBackend>,
        adapter: Arc<dyn ModelAdapter>,
        visibility_timeout: Duration,
    ) -> Self {
        Self {
            model: model.into(),
            queue,
            adapter,
            visibility_timeout,
        }
    }

    /// Runs forever, one job at a time. Intended to be the entire body of
    /// a dedicated process for models that need exclusive access to a
    /// local resource (spec.md §5: "Local GPU workers run as separate
    /// processes, one serial loop each").
    pub async fn run(&self) {
        loop {
            match self.run_once().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(IDLE_POLL).await,
                Err(err) => {
                    warn!(model = %self.model, %err, "serial worker iteration failed");
                    tokio::time::sleep(IDLE_POLL).await;
                }
            }
        }
    }

    /// Runs one claim/synthesize/complete cycle. Returns `Ok(false)` if
    /// the queue was empty. Exposed separately so tests can drive
    /// deterministic single steps instead of the unbounded loop.
    #[instrument(skip(self), fields(model = %self.model))]
    pub async fn run_once(&self) -> anyhow::Result<bool> {
        let Some(leased) = self.queue.claim(&self.model, self.visibility_timeout).await? else {
            return Ok(false);
        };

        let job = leased.job().clone();
        let result = match self.adapter.synthesize(&job.text, &job.voice, &job.voice_params).await {
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
                    // this loop racing its own backoff against the scanner.
                    warn!(job_id = %job.job_id, %err, "transient adapter failure, leaving lease to expire for retry");
                    return Ok(true);
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

        self.queue.push_result(&result).await?;
        self.queue.complete(&leased.entry.job_id, &leased.lease_token).await?;
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
                codec: "wav".to_string(),
                duration_ms: 100,
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

    fn test_job() -> JobRecord {
        let model: ModelSlug = "kokoro".into();
        JobRecord {
            job_id: JobId::new(),
            user_id: UserId::from_string("user1"),
            document_id: DocumentId::from_string("doc1"),
            block_idx: 0,
            text: "hello world".to_string(),
            model: model.clone(),
            voice: "af_heart".to_string(),
            voice_params: BTreeMap::new(),
            variant_hash: VariantHash::from_string("hash1"),
            usage_multiplier: 1.0,
            created_at_ms: 0,
            retry_count: 0,
        }
    }

    #[tokio::test]
    async fn run_once_returns_false_on_empty_queue() {
        let queue: Arc<dyn QueueBackend> = Arc::new(MemoryBackend::new());
        let worker = SerialWorker::new("kokoro", queue, Arc::new(EchoAdapter), Duration::from_secs(60));
        assert!(!worker.run_once().await.unwrap());
    }

    #[tokio::test]
    async fn run_once_claims_synthesizes_and_completes() {
        let queue: Arc<dyn QueueBackend> = Arc::new(MemoryBackend::new());
        queue.enqueue_if_new(test_job(), 0).await.unwrap();

        let worker = SerialWorker::new("kokoro", queue.clone(), Arc::new(EchoAdapter), Duration::from_secs(60));
        assert!(worker.run_once().await.unwrap());

        let results = queue.drain_results(10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].outcome, ResultOutcome::Audio { .. }));
    }

    #[tokio::test]
    async fn fatal_adapter_error_still_completes_the_job_with_an_error_result() {
        let queue: Arc<dyn QueueBackend> = Arc::new(MemoryBackend::new());
        queue.enqueue_if_new(test_job(), 0).await.unwrap();

        let worker = SerialWorker::new("kokoro", queue.clone(), Arc::new(AlwaysFatalAdapter), Duration::from_secs(60));
        assert!(worker.run_once().await.unwrap());

        let results = queue.drain_results(10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].outcome, ResultOutcome::Error { .. }));
    }
}
