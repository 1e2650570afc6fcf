//! Cold-path billing drain, spec.md §4.6: a serial drain of `billing`
//! isolated from the hot result-notification path so a slow usage store
//! can't add latency to playback. Grounded on `dog_queue::backend::memory::
//! reaper::LeaseReaper`'s interval-loop shape, same as the result consumer.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{instrument, warn};

use tts_core::wire::{ResultOutcome, ResultRecord};

use crate::state::AppState;

const DRAIN_BATCH: usize = 64;

pub struct BillingConsumer {
    state: AppState,
    poll_interval: Duration,
}

impl BillingConsumer {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_interval(state: AppState, poll_interval: Duration) -> Self {
        Self { state, poll_interval }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.drain_once().await {
                warn!(%err, "billing consumer drain failed");
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn drain_once(&self) -> anyhow::Result<usize> {
        let mut processed = 0;
        loop {
            let batch = self.state.queue.drain_billing_events(DRAIN_BATCH).await?;
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

    /// Billing is at-most-once: the dedup gate already ran in the result
    /// consumer (spec.md §4.5 step 1), so a failure here is logged and the
    /// event is simply discarded rather than retried — retrying would
    /// re-bill the same variant.
    async fn process_one(&self, record: &ResultRecord) {
        let duration_ms = match &record.outcome {
            ResultOutcome::Audio { duration_ms, .. } => *duration_ms,
            ResultOutcome::Error { .. } => {
                // Errors never reach `billing` (the result consumer only
                // pushes a billing event on the `Audio` branch), but guard
                // anyway rather than assume the invariant holds forever.
                warn!(job_id = %record.job_id, "unexpected error outcome in billing queue, discarding");
                return;
            }
        };

        let billed_chars = record.text_length as f64 * record.usage_multiplier;

        if let Err(err) = self
            .state
            .usage_recorder
            .record_usage(
                &record.user_id,
                billed_chars,
                record.model.as_str(),
                &record.voice,
                &record.document_id,
                record.variant_hash.as_str(),
                duration_ms,
            )
            .await
        {
            warn!(%err, job_id = %record.job_id, "usage recording failed, billing event discarded");
        }
    }
}
