//! Default stand-ins for the collaborators spec.md §6 treats as externally
//! supplied: full user authentication, billing-plan enforcement and the
//! document/block store are explicit Non-goals of this core, so a
//! deployment is expected to inject its own `UsageGate`/`DocumentStore`.
//! These defaults exist only so the binary boots and runs end-to-end
//! without one, grounded on the same "permissive local default, real
//! policy wired in by the embedder" shape as `tts_auth::
//! OpaqueTokenAuthenticator`.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::info;

use tts_core::collaborators::{DocumentStore, ResolvedBlock, UsageDecision, UsageGate, UsageRecorder};
use tts_core::{DocumentId, UserId};

/// Never denies a request. Real usage/plan enforcement lives outside this
/// core; a deployment that needs it replaces this with its own `UsageGate`.
pub struct AllowAllUsageGate;

#[async_trait]
impl UsageGate for AllowAllUsageGate {
    async fn check_usage(&self, _user_id: &UserId, _estimated_cost: f64) -> UsageDecision {
        UsageDecision::Allow
    }
}

/// Records usage as a structured log line instead of writing to a billing
/// store. Good enough to observe what would have been billed in local
/// development; a production deployment supplies a `UsageRecorder` backed
/// by its own ledger.
pub struct TracingUsageRecorder;

#[async_trait]
impl UsageRecorder for TracingUsageRecorder {
    async fn record_usage(
        &self,
        user_id: &UserId,
        billed_chars: f64,
        model: &str,
        voice: &str,
        document_id: &DocumentId,
        variant_hash: &str,
        duration_ms: u32,
    ) -> anyhow::Result<()> {
        info!(
            %user_id,
            %document_id,
            model,
            voice,
            variant_hash,
            billed_chars,
            duration_ms,
            "usage recorded"
        );
        Ok(())
    }
}

/// In-memory document/block store keyed by `(document_id, block_idx)`.
/// The real document model lives outside this core (spec.md's Non-goals);
/// this is the minimal stand-in the cache warmer and local development use
/// to exercise the full admission path without a real document service.
#[derive(Default)]
pub struct StaticDocumentStore {
    blocks: HashMap<(DocumentId, u32), ResolvedBlock>,
}

impl StaticDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, document_id: DocumentId, block_idx: u32, block: ResolvedBlock) {
        self.blocks.insert((document_id, block_idx), block);
    }
}

#[async_trait]
impl DocumentStore for StaticDocumentStore {
    async fn get_block(&self, document_id: &DocumentId, block_idx: u32) -> anyhow::Result<Option<ResolvedBlock>> {
        Ok(self.blocks.get(&(document_id.clone(), block_idx)).cloned())
    }
}
