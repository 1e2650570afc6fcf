//! HTTP-surface error-shape tests, grounded on the teacher's
//! `dog-axum` request-id / error-envelope conformance tests but exercising
//! the audio-fetch endpoints against a real router instead of a generic
//! `DogApp` service registry.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderValue, Request};
use bytes::Bytes;
use dashmap::DashMap;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use tts_auth::OpaqueTokenAuthenticator;
use tts_cache::{CacheCapabilities, CacheResult, CachedVariant, VariantCache};
use tts_core::collaborators::{DocumentStore, ResolvedBlock, UsageDecision, UsageGate, UsageRecorder};
use tts_core::{DocumentId, TtsConfig, UserId, VariantHash};
use tts_queue::{BoxStream, MemoryBackend};
use tts_web::{router, AppState, NotificationFabric};

/// In-memory stand-in for the sled-backed production cache.
#[derive(Default)]
struct FakeCache {
    entries: DashMap<String, CachedVariant>,
}

#[async_trait]
impl VariantCache for FakeCache {
    async fn get(&self, variant_hash: &VariantHash) -> CacheResult<Option<CachedVariant>> {
        Ok(self.entries.get(variant_hash.as_str()).map(|e| e.clone()))
    }

    async fn exists(&self, variant_hash: &VariantHash) -> CacheResult<bool> {
        Ok(self.entries.contains_key(variant_hash.as_str()))
    }

    async fn put(&self, variant_hash: &VariantHash, audio: Bytes, codec: &str, duration_ms: u32) -> CacheResult<()> {
        self.entries.insert(
            variant_hash.as_str().to_string(),
            CachedVariant {
                audio,
                codec: codec.to_string(),
                duration_ms,
                created_at_ms: 0,
            },
        );
        Ok(())
    }

    async fn pin(&self, _variant_hash: &VariantHash) -> CacheResult<()> {
        Ok(())
    }

    async fn unpin(&self, _variant_hash: &VariantHash) -> CacheResult<()> {
        Ok(())
    }

    async fn evict_lru(&self, _target_size: u64) -> CacheResult<Vec<VariantHash>> {
        Ok(Vec::new())
    }

    fn capabilities(&self) -> CacheCapabilities {
        CacheCapabilities::default()
    }
}

struct AllowAllUsageGate;

#[async_trait]
impl UsageGate for AllowAllUsageGate {
    async fn check_usage(&self, _user_id: &UserId, _estimated_cost: f64) -> UsageDecision {
        UsageDecision::Allow
    }
}

struct NoopUsageRecorder;

#[async_trait]
impl UsageRecorder for NoopUsageRecorder {
    async fn record_usage(
        &self,
        _user_id: &UserId,
        _billed_chars: f64,
        _model: &str,
        _voice: &str,
        _document_id: &DocumentId,
        _variant_hash: &str,
        _duration_ms: u32,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

struct EmptyDocumentStore;

#[async_trait]
impl DocumentStore for EmptyDocumentStore {
    async fn get_block(&self, _document_id: &DocumentId, _block_idx: u32) -> anyhow::Result<Option<ResolvedBlock>> {
        Ok(None)
    }
}

struct NoopNotificationFabric;

#[async_trait]
impl NotificationFabric for NoopNotificationFabric {
    async fn publish(
        &self,
        _user_id: &UserId,
        _document_id: &DocumentId,
        _message: &tts_core::wire::ServerMessage,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn subscribe(&self, _user_id: &UserId, _document_id: &DocumentId) -> anyhow::Result<BoxStream<tts_core::wire::ServerMessage>> {
        Ok(Box::pin(futures::stream::empty()))
    }
}

fn test_state() -> AppState {
    AppState {
        queue: Arc::new(MemoryBackend::new()),
        cache: Arc::new(FakeCache::default()),
        auth: Arc::new(OpaqueTokenAuthenticator),
        usage_gate: Arc::new(AllowAllUsageGate),
        usage_recorder: Arc::new(NoopUsageRecorder),
        documents: Arc::new(EmptyDocumentStore),
        notify: Arc::new(NoopNotificationFabric),
        config: TtsConfig::default(),
    }
}

async fn json_body(res: axum::response::Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn fetching_unknown_variant_returns_not_found_shape() {
    let app = router(test_state());

    let res = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/audio/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 404);
    assert!(res.headers().get("x-request-id").is_some());
    let body = json_body(res).await;
    assert_eq!(body["error_code"], "not-found");
}

#[tokio::test]
async fn request_id_is_preserved_when_provided() {
    let app = router(test_state());
    let provided = HeaderValue::from_static("req-test-123");

    let res = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/audio/does-not-exist")
                .header("x-request-id", provided.clone())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.headers().get("x-request-id").unwrap(), &provided);
}

#[tokio::test]
async fn malformed_upload_body_returns_bad_request_shape() {
    let app = router(test_state());

    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/audio")
                .header("content-type", "application/json")
                .body(Body::from("{\"variant_hash\": \"x\""))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 400);
}

#[tokio::test]
async fn browser_upload_then_fetch_round_trips() {
    let app = router(test_state());

    let upload = serde_json::json!({
        "variant_hash": "abc123",
        "bytes": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"fake audio bytes"),
        "codec": "mp3",
        "duration_ms": 1200,
    });

    let res = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/audio")
                .header("content-type", "application/json")
                .body(Body::from(upload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);

    let res = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/audio/abc123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(res.headers().get("content-type").unwrap(), "audio/mpeg");
}

#[tokio::test]
async fn range_request_returns_partial_content() {
    let app = router(test_state());

    let upload = serde_json::json!({
        "variant_hash": "ranged",
        "bytes": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"0123456789"),
        "codec": "wav",
        "duration_ms": 1200,
    });
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/audio")
                .header("content-type", "application/json")
                .body(Body::from(upload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let res = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/audio/ranged")
                .header("range", "bytes=2-4")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 206);
    assert_eq!(res.headers().get("content-range").unwrap(), "bytes 2-4/10");
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"234");
}

#[tokio::test]
async fn out_of_bounds_range_is_rejected() {
    let app = router(test_state());

    let upload = serde_json::json!({
        "variant_hash": "ranged2",
        "bytes": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"0123456789"),
        "codec": "wav",
        "duration_ms": 1200,
    });
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/audio")
                .header("content-type", "application/json")
                .body(Body::from(upload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let res = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/audio/ranged2")
                .header("range", "bytes=100-200")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 416);
    assert_eq!(res.headers().get("content-range").unwrap(), "bytes */10");
}

#[tokio::test]
async fn websocket_upgrade_without_token_is_rejected() {
    let app = router(test_state());

    let res = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v1/ws/tts")
                .header("connection", "upgrade")
                .header("upgrade", "websocket")
                .header("sec-websocket-version", "13")
                .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(res.status().as_u16(), 401);
    let body = json_body(res).await;
    assert_eq!(body["error_code"], "not-authenticated");
}
