//! Hot-path result drain, spec.md §4.5: turns worker output sitting on
//! `results` into client notifications and cache writes, with no
//! persistent-DB access on this path (that's the billing consumer's job).
//! Grounded on `dog_queue::backend::memory::reaper::LeaseReaper`'s
//! interval-loop shape.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::interval;
use tracing::{debug, instrument, warn};

use tts_core::wire::{BlockStatus, ResultOutcome, ResultRecord, ServerMessage};

use crate::state::AppState;

const DRAIN_BATCH: usize = 64;

pub struct ResultConsumer {
    state: AppState,
    poll_interval: Duration,
}

impl ResultConsumer {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            poll_interval: Duration::from_millis(200),
        }
    }

    pub fn with_interval(state: AppState, poll_interval: Duration) -> Self {
        Self { state, poll_interval }
    }

    /// Runs forever, draining `results` on a fixed tick. Intended to be
    /// spawned once per orchestrator process.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.drain_once().await {
                warn!(%err, "result consumer drain failed");
            }
        }
    }

    /// Runs one drain cycle, draining until `results` is empty or the
    /// batch cap is hit. Exposed separately so tests can step it
    /// deterministically instead of waiting on the ticker.
    #[instrument(skip(self))]
    pub async fn drain_once(&self) -> anyhow::Result<usize> {
        let mut processed = 0;
        loop {
            let batch = self.state.queue.drain_results(DRAIN_BATCH).await?;
            if batch.is_empty() {
                return Ok(processed);
            }
            for record in &batch {
                self.process_one(record).await;
            }
            processed += batch.len();
            if batch.len() < DRAIN_BATCH {
                return Ok(processed);
            }
        }
    }

    async fn process_one(&self, record: &ResultRecord) {
        // Step 1: dedup gate. A duplicate from a visibility-timeout retry
        // loses the race and is dropped silently — the real result already
        // ran this same step and won.
        match self
            .state
            .queue
            .delete_inflight_if_owner(&record.variant_hash, &record.job_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %record.job_id, "dropping duplicate result, inflight gate already cleared");
                return;
            }
            Err(err) => {
                warn!(%err, job_id = %record.job_id, "inflight gate check failed, dropping result");
                return;
            }
        }

        match &record.outcome {
            ResultOutcome::Error { error_code, error_message } => {
                self.publish_status(record, BlockStatus::Error, None, Some(format!("{error_code}: {error_message}")))
                    .await;
                return;
            }
            ResultOutcome::Audio { audio_b64, codec, duration_ms } => {
                use base64::Engine;
                let bytes = match base64::engine::general_purpose::STANDARD.decode(audio_b64.as_bytes()) {
                    Ok(b) => b,
                    Err(err) => {
                        warn!(%err, job_id = %record.job_id, "result audio was not valid base64");
                        self.publish_status(record, BlockStatus::Error, None, Some("invalid audio payload".to_string()))
                            .await;
                        return;
                    }
                };

                if bytes.is_empty() {
                    // whitespace-only text: no audio to cache, no billing.
                    self.publish_status(record, BlockStatus::Skipped, None, None).await;
                    return;
                }

                if let Err(err) = self
                    .state
                    .cache
                    .put(&record.variant_hash, Bytes::from(bytes), codec, *duration_ms)
                    .await
                {
                    warn!(%err, job_id = %record.job_id, "cache put failed");
                    self.publish_status(record, BlockStatus::Error, None, Some("cache write failed".to_string()))
                        .await;
                    return;
                }

                let audio_url = format!("/audio/{}", record.variant_hash.as_str());
                self.publish_status(record, BlockStatus::Cached, Some(audio_url), None).await;

                if let Err(err) = self.state.queue.push_billing_event(record).await {
                    warn!(%err, job_id = %record.job_id, "failed to push billing event, usage for this variant will not be recorded");
                }
            }
        }
    }

    async fn publish_status(
        &self,
        record: &ResultRecord,
        status: BlockStatus,
        audio_url: Option<String>,
        error: Option<String>,
    ) {
        let mut message = ServerMessage::status(
            record.document_id.clone(),
            record.block_idx,
            status,
            record.model.as_str(),
            record.voice.as_str(),
        )
        .with_variant_hash(record.variant_hash.clone());
        if let Some(url) = audio_url {
            message = message.with_audio_url(url);
        }
        if let Some(err) = error {
            message = message.with_error(err);
        }
        if let Err(err) = self
            .state
            .notify
            .publish(&record.user_id, &record.document_id, &message)
            .await
        {
            warn!(%err, job_id = %record.job_id, "failed to publish notification");
        }
    }
}
