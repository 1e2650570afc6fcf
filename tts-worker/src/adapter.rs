//! The model adapter boundary, spec.md §4.4: `synthesize(text, voice,
//! params) -> (bytes, codec, duration_ms) | error_code`. Adapters never
//! touch Redis or the cache — that's the worker loops' job.
//!
//! Grounded on `other_examples/...voice_queue.rs.rs::VoiceQueue`'s
//! synthesis boundary, made async and fallible in the idiom of
//! `dog-queue/src/adapter.rs`'s trait-object worker plumbing.

use async_trait::async_trait;
use bytes::Bytes;

use tts_core::wire::SynthesisParams;

/// Whether an adapter failure should be retried by the caller.
///
/// Transient failures (spec.md §4.4: HTTP 429/500/503/504-class upstream
/// errors) get the normal retry/backoff path; non-transient failures
/// (malformed text, unsupported voice) surface immediately as a result
/// error and are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Fatal,
}

#[derive(Debug, Clone)]
pub struct AdapterError {
    pub kind: FailureKind,
    pub code: String,
    pub message: String,
}

impl AdapterError {
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn fatal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?}): {}", self.code, self.kind, self.message)
    }
}

impl std::error::Error for AdapterError {}

#[derive(Debug, Clone)]
pub struct Synthesized {
    pub audio: Bytes,
    pub codec: String,
    pub duration_ms: u32,
}

/// A model's synthesis backend. One implementation per `model` slug; the
/// worker loops are generic over this trait and never know which concrete
/// model they're driving.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        params: &SynthesisParams,
    ) -> Result<Synthesized, AdapterError>;
}
