//! `GET /audio/{variant_hash}` and `POST /audio`, spec.md §4.10 / §6.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use tts_cache::ResolvedRange;
use tts_core::{TtsError, VariantHash};

use crate::error::WebError;
use crate::state::AppState;

fn media_type(codec: &str) -> &'static str {
    match codec {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "opus" => "audio/opus",
        _ => "application/octet-stream",
    }
}

/// Parses a single-range `Range: bytes=start-end` header value. Multi-range
/// requests (`bytes=0-10,20-30`) and suffix ranges (`bytes=-500`) aren't
/// supported; callers fall back to a full `200` response for anything this
/// returns `None` for, per RFC 7233's "ignore the header" guidance.
fn parse_range_header(value: &str) -> Option<(u64, Option<u64>)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start_str, end_str) = spec.split_once('-')?;
    let start: u64 = start_str.parse().ok()?;
    let end = if end_str.is_empty() { None } else { Some(end_str.parse().ok()?) };
    Some((start, end))
}

/// Immutable, content-hash-addressed — cacheable by any intermediary for a
/// long TTL (spec.md §4.10). Serves partial content for a `Range` request so
/// a player can seek without re-downloading the whole variant.
pub async fn get_audio(
    State(state): State<AppState>,
    Path(variant_hash): Path<String>,
    headers: HeaderMap,
) -> Result<Response, WebError> {
    let hash = VariantHash::from_string(variant_hash);
    let variant = state
        .cache
        .get(&hash)
        .await
        .map_err(|e| WebError::from(anyhow::Error::new(e)))?
        .ok_or_else(|| WebError::from(TtsError::not_found("variant not cached")))?;

    let total_size = variant.audio.len() as u64;
    let content_type = media_type(&variant.codec);
    const CACHE_CONTROL_VALUE: &str = "public, max-age=31536000, immutable";

    let requested_range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header);

    let Some((start, end)) = requested_range else {
        return Ok((
            [
                (header::CONTENT_TYPE, content_type.to_string()),
                (header::CACHE_CONTROL, CACHE_CONTROL_VALUE.to_string()),
                (header::ACCEPT_RANGES, "bytes".to_string()),
            ],
            variant.audio,
        )
            .into_response());
    };

    let Some(range) = ResolvedRange::resolve(start, end, total_size) else {
        return Ok((
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{total_size}"))],
        )
            .into_response());
    };

    let body = variant.audio.slice(range.start as usize..=range.end as usize);
    Ok((
        StatusCode::PARTIAL_CONTENT,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CACHE_CONTROL, CACHE_CONTROL_VALUE.to_string()),
            (header::CONTENT_RANGE, range.content_range_header()),
            (header::ACCEPT_RANGES, "bytes".to_string()),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct BrowserSynthesisUpload {
    pub variant_hash: String,
    /// Base64-encoded audio bytes — the wire format mirrors
    /// `ResultOutcome::Audio`'s `audio_b64` field (spec.md §6).
    pub bytes: String,
    pub codec: String,
    pub duration_ms: u32,
}

#[derive(Debug, Serialize)]
pub struct UploadAck {
    pub variant_hash: String,
}

/// Optional browser-synthesis upload path. Idempotent insert into the
/// cache; does NOT generate a billing event — browser synthesis is
/// non-metered (spec.md §6).
pub async fn post_audio(
    State(state): State<AppState>,
    Json(body): Json<BrowserSynthesisUpload>,
) -> Result<impl IntoResponse, WebError> {
    use base64::Engine;

    let audio = base64::engine::general_purpose::STANDARD
        .decode(body.bytes.as_bytes())
        .map_err(|e| WebError::from(TtsError::bad_request(format!("invalid base64 audio: {e}"))))?;

    let hash = VariantHash::from_string(body.variant_hash.clone());
    state
        .cache
        .put(&hash, Bytes::from(audio), &body.codec, body.duration_ms)
        .await
        .map_err(|e| WebError::from(anyhow::Error::new(e)))?;

    Ok(Json(UploadAck {
        variant_hash: body.variant_hash,
    }))
}
