//! Traits for the external collaborators spec.md §6 names as *consumed*,
//! not implemented, by the core. Grounded on `dog_blob::store::
//! BlobKeyStrategy`'s pattern of small, focused, injectable traits rather
//! than a generic plugin framework.

use async_trait::async_trait;

use crate::ids::{DocumentId, UserId};
use crate::wire::SynthesisParams;

/// Outcome of a usage-gate check, consumed only by the orchestrator, only
/// before enqueue (spec.md §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageDecision {
    Allow,
    Deny { reason: String },
}

/// `check_usage(user_id, est_cost) -> allow | deny(reason)`.
#[async_trait]
pub trait UsageGate: Send + Sync {
    async fn check_usage(&self, user_id: &UserId, estimated_cost: f64) -> UsageDecision;
}

/// `record_usage(user_id, chars * multiplier, model, voice, document_id,
/// variant_hash, duration_ms)`, invoked only by the billing consumer
/// (spec.md §4.6, §6). Folds in the §4.6 step 1 variant-metadata upsert —
/// there is no separate metadata-store collaborator, since the only thing
/// that ever reads that row back out is billing/engagement reporting, and
/// a deployment's usage store is the natural place to keep it next to the
/// usage ledger it's billed against.
#[async_trait]
pub trait UsageRecorder: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn record_usage(
        &self,
        user_id: &UserId,
        billed_chars: f64,
        model: &str,
        voice: &str,
        document_id: &DocumentId,
        variant_hash: &str,
        duration_ms: u32,
    ) -> anyhow::Result<()>;
}

/// Result of resolving a block from the document store.
#[derive(Debug, Clone)]
pub struct ResolvedBlock {
    pub text: String,
    pub voice_params: SynthesisParams,
    pub usage_multiplier: f64,
}

/// `get_block(document_id, block_idx) -> (text, voice_params,
/// usage_multiplier) | NotFound`, consumed by the orchestrator when
/// admitting a `synthesize` request (spec.md §4.3, §6).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_block(
        &self,
        document_id: &DocumentId,
        block_idx: u32,
    ) -> anyhow::Result<Option<ResolvedBlock>>;
}
