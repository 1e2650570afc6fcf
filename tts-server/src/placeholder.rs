//! A model adapter that returns silence. TTS model internals are an
//! explicit Non-goal of this core (spec.md) — this exists only so the
//! binary has at least one working `ModelAdapter` out of the box; a real
//! deployment configures its own adapters per model slug and never reaches
//! this one.

use async_trait::async_trait;
use bytes::Bytes;

use tts_core::wire::SynthesisParams;
use tts_worker::{AdapterError, ModelAdapter, Synthesized};

/// A minimal WAV header for a zero-sample, 8kHz mono PCM16 file, followed
/// by as many silent samples as `text.len()` would plausibly take to
/// speak at a rough 15 characters/second rate.
pub struct SilentAdapter;

#[async_trait]
impl ModelAdapter for SilentAdapter {
    async fn synthesize(&self, text: &str, _voice: &str, _params: &SynthesisParams) -> Result<Synthesized, AdapterError> {
        if text.trim().is_empty() {
            return Err(AdapterError::fatal("empty_text", "cannot synthesize empty text"));
        }
        let seconds = (text.len() as f32 / 15.0).max(0.2);
        let duration_ms = (seconds * 1000.0) as u32;
        let sample_count = (8_000.0 * seconds) as usize;
        let mut audio = build_wav_header(sample_count);
        audio.extend(std::iter::repeat(0u8).take(sample_count * 2));
        Ok(Synthesized {
            audio: Bytes::from(audio),
            codec: "wav".to_string(),
            duration_ms,
        })
    }
}

fn build_wav_header(sample_count: usize) -> Vec<u8> {
    let data_len = (sample_count * 2) as u32;
    let mut header = Vec::with_capacity(44);
    header.extend_from_slice(b"RIFF");
    header.extend_from_slice(&(36 + data_len).to_le_bytes());
    header.extend_from_slice(b"WAVE");
    header.extend_from_slice(b"fmt ");
    header.extend_from_slice(&16u32.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes());
    header.extend_from_slice(&1u16.to_le_bytes());
    header.extend_from_slice(&8_000u32.to_le_bytes());
    header.extend_from_slice(&16_000u32.to_le_bytes());
    header.extend_from_slice(&2u16.to_le_bytes());
    header.extend_from_slice(&16u16.to_le_bytes());
    header.extend_from_slice(b"data");
    header.extend_from_slice(&data_len.to_le_bytes());
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn synthesizes_nonempty_text_into_valid_wav_header() {
        let adapter = SilentAdapter;
        let synth = adapter.synthesize("hello there", "nova", &BTreeMap::new()).await.unwrap();
        assert_eq!(&synth.audio[0..4], b"RIFF");
        assert_eq!(&synth.audio[8..12], b"WAVE");
        assert!(synth.duration_ms > 0);
    }

    #[tokio::test]
    async fn rejects_empty_text() {
        let adapter = SilentAdapter;
        let err = adapter.synthesize("", "nova", &BTreeMap::new()).await.unwrap_err();
        assert_eq!(err.kind, tts_worker::FailureKind::Fatal);
    }
}
