//! Wire-protocol types shared between the websocket orchestrator, the
//! worker pool, and the Redis job/result serialization boundary.
//!
//! Tagged-union message shape grounded on
//! `harborgrid-justin-caddy`'s `enterprise::realtime::sync::SyncMessage`
//! (`#[serde(tag = "type")]`); job/result field layout is spec.md §6's
//! literal wire format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ids::{DocumentId, JobId, ModelSlug, UserId, VariantHash};

/// A unit of text to be synthesized. Produced and owned by document
/// ingestion (out of scope here); the core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub document_id: DocumentId,
    pub block_idx: u32,
    pub text: String,
    pub estimated_duration_ms: Option<u32>,
}

/// Voice parameters as a canonically-ordered map so that hashing is
/// deterministic regardless of client-supplied key order.
pub type SynthesisParams = BTreeMap<String, serde_json::Value>;

/// `variant_hash = H(text ‖ model_slug ‖ voice_slug ‖ sorted(params))`.
///
/// Intentionally excludes the audio codec: see DESIGN.md's Open Question
/// decision (1). An adapter change that alters its output codec without a
/// cache generation bump will serve stale-codec bytes under the old hash.
pub fn compute_variant_hash(
    text: &str,
    model_slug: &ModelSlug,
    voice_slug: &str,
    params: &SynthesisParams,
) -> VariantHash {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(b"\u{1}");
    hasher.update(model_slug.as_str().as_bytes());
    hasher.update(b"\u{1}");
    hasher.update(voice_slug.as_bytes());
    for (k, v) in params {
        hasher.update(b"\u{1}");
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(v.to_string().as_bytes());
    }
    VariantHash(format!("{:x}", hasher.finalize()))
}

/// Synthesis mode requested by the client for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisMode {
    Server,
    Browser,
}

/// Per-block status reported to the client, spec.md §4.3 / §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    Queued,
    Processing,
    Cached,
    Skipped,
    Error,
}

/// Client → server websocket messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Synthesize {
        document_id: DocumentId,
        block_indices: Vec<u32>,
        cursor: i64,
        model: String,
        voice: String,
        synthesis_mode: SynthesisMode,
    },
    CursorMoved {
        document_id: DocumentId,
        cursor: i64,
    },
}

/// Server → client websocket messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Status {
        document_id: DocumentId,
        block_idx: u32,
        status: BlockStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        variant_hash: Option<VariantHash>,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        model_slug: String,
        voice_slug: String,
    },
    Evicted {
        document_id: DocumentId,
        block_indices: Vec<u32>,
    },
    Error {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl ServerMessage {
    pub fn status(
        document_id: DocumentId,
        block_idx: u32,
        status: BlockStatus,
        model_slug: impl Into<String>,
        voice_slug: impl Into<String>,
    ) -> Self {
        ServerMessage::Status {
            document_id,
            block_idx,
            status,
            variant_hash: None,
            audio_url: None,
            error: None,
            model_slug: model_slug.into(),
            voice_slug: voice_slug.into(),
        }
    }

    pub fn with_variant_hash(mut self, hash: VariantHash) -> Self {
        if let ServerMessage::Status { variant_hash, .. } = &mut self {
            *variant_hash = Some(hash);
        }
        self
    }

    pub fn with_audio_url(mut self, url: impl Into<String>) -> Self {
        if let ServerMessage::Status { audio_url, .. } = &mut self {
            *audio_url = Some(url.into());
        }
        self
    }

    pub fn with_error(mut self, err: impl Into<String>) -> Self {
        if let ServerMessage::Status { error, .. } = &mut self {
            *error = Some(err.into());
        }
        self
    }
}

/// Job wire format, spec.md §3 / §6. Serialized into the `jobs` Redis hash
/// and the `queue:{M}` sorted set member payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub user_id: UserId,
    pub document_id: DocumentId,
    pub block_idx: u32,
    pub text: String,
    pub model: ModelSlug,
    pub voice: String,
    pub voice_params: SynthesisParams,
    pub variant_hash: VariantHash,
    pub usage_multiplier: f64,
    pub created_at_ms: i64,
    pub retry_count: u32,
}

impl JobRecord {
    /// The `"{user}:{document}:{block}:{model}:{voice}"` logical key used
    /// by the `index` hash for eviction (spec.md §4.2).
    pub fn logical_key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.user_id, self.document_id, self.block_idx, self.model, self.voice
        )
    }
}

/// A worker's synthesis output or failure, spec.md §3 / §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub job_id: JobId,
    pub variant_hash: VariantHash,
    pub user_id: UserId,
    pub document_id: DocumentId,
    pub block_idx: u32,
    pub model: ModelSlug,
    pub voice: String,
    pub usage_multiplier: f64,
    pub text_length: u32,
    #[serde(flatten)]
    pub outcome: ResultOutcome,
}

/// Either the worker produced audio, or it failed. Tagged so that the
/// result consumer can match on `outcome` without guessing field presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultOutcome {
    Audio {
        audio_b64: String,
        codec: String,
        duration_ms: u32,
    },
    Error {
        error_code: String,
        error_message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, serde_json::Value)]) -> SynthesisParams {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn variant_hash_is_deterministic() {
        let model: ModelSlug = "kokoro".into();
        let p1 = params(&[("speed", serde_json::json!(1.0))]);
        let p2 = params(&[("speed", serde_json::json!(1.0))]);
        let h1 = compute_variant_hash("Hello world", &model, "af_heart", &p1);
        let h2 = compute_variant_hash("Hello world", &model, "af_heart", &p2);
        assert_eq!(h1, h2);
    }

    #[test]
    fn variant_hash_is_independent_of_param_insertion_order() {
        let model: ModelSlug = "kokoro".into();
        let mut p1 = SynthesisParams::new();
        p1.insert("a".to_string(), serde_json::json!(1));
        p1.insert("b".to_string(), serde_json::json!(2));
        let mut p2 = SynthesisParams::new();
        p2.insert("b".to_string(), serde_json::json!(2));
        p2.insert("a".to_string(), serde_json::json!(1));
        let h1 = compute_variant_hash("x", &model, "v", &p1);
        let h2 = compute_variant_hash("x", &model, "v", &p2);
        assert_eq!(h1, h2);
    }

    #[test]
    fn variant_hash_changes_with_text_or_voice() {
        let model: ModelSlug = "kokoro".into();
        let p = SynthesisParams::new();
        let h1 = compute_variant_hash("Hello", &model, "af_heart", &p);
        let h2 = compute_variant_hash("Hello!", &model, "af_heart", &p);
        let h3 = compute_variant_hash("Hello", &model, "af_bella", &p);
        assert_ne!(h1, h2);
        assert_ne!(h1, h3);
    }

    #[test]
    fn client_message_tagged_union_round_trips() {
        let msg = ClientMessage::CursorMoved {
            document_id: DocumentId::from_string("doc1"),
            cursor: 42,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"cursor_moved\""));
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        match back {
            ClientMessage::CursorMoved { cursor, .. } => assert_eq!(cursor, 42),
            _ => panic!("wrong variant"),
        }
    }
}
