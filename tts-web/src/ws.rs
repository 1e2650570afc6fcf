//! The `/v1/ws/tts` synthesis orchestrator, spec.md §4.3 / §6: the
//! websocket front door that turns `synthesize`/`cursor_moved` client
//! messages into queue admissions, cache hits, and eviction, and forwards
//! completion notifications back over the socket.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use tts_auth::extract_bearer_token;
use tts_core::collaborators::UsageDecision;
use tts_core::wire::{
    compute_variant_hash, BlockStatus, ClientMessage, JobRecord, ServerMessage, SynthesisMode,
};
use tts_core::{DocumentId, JobId, ModelSlug, TtsError, UserId, VariantHash};
use tts_queue::types::JobPriority;

use crate::error::WebError;
use crate::state::AppState;

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.as_str().to_string(), s.to_string())))
        .collect()
}

fn logical_key(user_id: &UserId, document_id: &DocumentId, block_idx: u32, model: &str, voice: &str) -> String {
    format!("{user_id}:{document_id}:{block_idx}:{model}:{voice}")
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = extract_bearer_token(&headers_to_map(&headers)).or_else(|| query.get("token").cloned());

    let Some(token) = token else {
        return WebError::from(TtsError::not_authenticated("missing session token")).into_response();
    };

    match state.auth.authenticate(&token).await {
        Ok(user_id) => ws.on_upgrade(move |socket| handle_socket(socket, state, user_id)),
        Err(err) => WebError::from(err).into_response(),
    }
}

/// A block the session has queued but not yet seen a terminal status for —
/// enough to reconstruct the logical key `cursor_moved` needs to evict it.
struct PendingBlock {
    model: ModelSlug,
    voice: String,
}

struct Session {
    user_id: UserId,
    outgoing: mpsc::UnboundedSender<ServerMessage>,
    /// `(document_id, variant_hash)` pairs this session is waiting on a
    /// `done:{user}:{document}` notification for (spec.md §3's
    /// Subscription type).
    subscriptions: DashMap<(DocumentId, VariantHash), ()>,
    /// `(document_id, block_idx) -> last requested (model, voice)`, used by
    /// `cursor_moved` to rebuild the logical key to evict.
    pending_blocks: DashMap<(DocumentId, u32), PendingBlock>,
    /// One forwarding task per document currently subscribed to.
    doc_tasks: DashMap<DocumentId, tokio::task::JoinHandle<()>>,
}

#[instrument(skip(socket, state), fields(%user_id))]
async fn handle_socket(socket: WebSocket, state: AppState, user_id: UserId) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(err) => {
                    warn!(%err, "failed to serialize outgoing message");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let session = Arc::new(Session {
        user_id: user_id.clone(),
        outgoing: tx,
        subscriptions: DashMap::new(),
        pending_blocks: DashMap::new(),
        doc_tasks: DashMap::new(),
    });

    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        let parsed: Result<ClientMessage, _> = serde_json::from_str(&text);
        match parsed {
            Ok(ClientMessage::Synthesize {
                document_id,
                block_indices,
                cursor: _,
                model,
                voice,
                synthesis_mode,
            }) => {
                handle_synthesize(
                    &state,
                    &session,
                    document_id,
                    block_indices,
                    model,
                    voice,
                    synthesis_mode,
                )
                .await;
            }
            Ok(ClientMessage::CursorMoved { document_id, cursor }) => {
                handle_cursor_moved(&state, &session, document_id, cursor).await;
            }
            Err(err) => {
                let _ = session.outgoing.send(ServerMessage::Error {
                    reason: "malformed_message".to_string(),
                    detail: Some(err.to_string()),
                });
            }
        }
    }

    for task in session.doc_tasks.iter() {
        task.abort();
    }
    writer.abort();
}

/// Lazily subscribe this session to the `(user, document)` notification
/// channel the first time it has anything outstanding for that document.
fn ensure_document_subscription(state: &AppState, session: &Arc<Session>, document_id: &DocumentId) {
    if session.doc_tasks.contains_key(document_id) {
        return;
    }
    let state = state.clone();
    let session = Arc::clone(session);
    let document_id = document_id.clone();
    let task = tokio::spawn(async move {
        let stream = match state.notify.subscribe(&session.user_id, &document_id).await {
            Ok(s) => s,
            Err(err) => {
                warn!(%err, "failed to subscribe to notification channel");
                return;
            }
        };
        tokio::pin!(stream);
        while let Some(message) = stream.next().await {
            if let ServerMessage::Status { variant_hash, document_id: ref doc, .. } = &message {
                let interested = variant_hash
                    .as_ref()
                    .map(|h| session.subscriptions.contains_key(&(doc.clone(), h.clone())))
                    .unwrap_or(false);
                if !interested {
                    continue;
                }
                if let Some(hash) = variant_hash {
                    session.subscriptions.remove(&(doc.clone(), hash.clone()));
                }
            }
            if session.outgoing.send(message).is_err() {
                break;
            }
        }
    });
    session.doc_tasks.insert(document_id, task);
}

#[allow(clippy::too_many_arguments)]
async fn handle_synthesize(
    state: &AppState,
    session: &Arc<Session>,
    document_id: DocumentId,
    block_indices: Vec<u32>,
    model: String,
    voice: String,
    _synthesis_mode: SynthesisMode,
) {
    if block_indices.is_empty() {
        // spec.md §8 boundary: zero blocks is a no-op, no reply.
        return;
    }

    let model_slug = ModelSlug::from(model.as_str());
    ensure_document_subscription(state, session, &document_id);

    for block_idx in block_indices {
        let resolved = match state.documents.get_block(&document_id, block_idx).await {
            Ok(Some(b)) => b,
            Ok(None) => {
                let _ = session.outgoing.send(
                    ServerMessage::status(document_id.clone(), block_idx, BlockStatus::Error, model.as_str(), voice.as_str())
                        .with_error("unknown block"),
                );
                continue;
            }
            Err(err) => {
                let _ = session.outgoing.send(ServerMessage::Error {
                    reason: "document_lookup_failed".to_string(),
                    detail: Some(err.to_string()),
                });
                return;
            }
        };

        let variant_hash = compute_variant_hash(&resolved.text, &model_slug, &voice, &resolved.voice_params);

        match state.cache.exists(&variant_hash).await {
            Ok(true) => {
                let _ = session.outgoing.send(
                    ServerMessage::status(document_id.clone(), block_idx, BlockStatus::Cached, model.as_str(), voice.as_str())
                        .with_variant_hash(variant_hash.clone())
                        .with_audio_url(format!("/audio/{}", variant_hash.as_str())),
                );
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(%err, "cache existence check failed");
            }
        }

        let estimated_cost = resolved.text.len() as f64 * resolved.usage_multiplier;
        match state.usage_gate.check_usage(&session.user_id, estimated_cost).await {
            UsageDecision::Deny { reason } => {
                let _ = session.outgoing.send(
                    ServerMessage::status(document_id.clone(), block_idx, BlockStatus::Error, model.as_str(), voice.as_str())
                        .with_error(reason),
                );
                continue;
            }
            UsageDecision::Allow => {}
        }

        let job = JobRecord {
            job_id: JobId::new(),
            user_id: session.user_id.clone(),
            document_id: document_id.clone(),
            block_idx,
            text: resolved.text,
            model: model_slug.clone(),
            voice: voice.clone(),
            voice_params: resolved.voice_params,
            variant_hash: variant_hash.clone(),
            usage_multiplier: resolved.usage_multiplier,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
            retry_count: 0,
        };

        let bias = JobPriority::Normal.score_bias_ms();
        if let Err(err) = state.queue.enqueue_if_new(job, bias).await {
            warn!(%err, "enqueue_if_new failed");
            let _ = session.outgoing.send(
                ServerMessage::status(document_id.clone(), block_idx, BlockStatus::Error, model.as_str(), voice.as_str())
                    .with_error("internal error"),
            );
            continue;
        }

        session
            .subscriptions
            .insert((document_id.clone(), variant_hash.clone()), ());
        session.pending_blocks.insert(
            (document_id.clone(), block_idx),
            PendingBlock {
                model: model_slug.clone(),
                voice: voice.clone(),
            },
        );

        let _ = session.outgoing.send(ServerMessage::status(
            document_id.clone(),
            block_idx,
            BlockStatus::Queued,
            model.as_str(),
            voice.as_str(),
        ));
    }
}

async fn handle_cursor_moved(state: &AppState, session: &Arc<Session>, document_id: DocumentId, cursor: i64) {
    let behind = state.config.retention_behind as i64;
    let ahead = state.config.retention_ahead as i64;
    let window = (cursor - behind)..=(cursor + ahead);

    let to_evict: Vec<u32> = session
        .pending_blocks
        .iter()
        .filter(|entry| entry.key().0 == document_id && !window.contains(&(entry.key().1 as i64)))
        .map(|entry| entry.key().1)
        .collect();

    let mut evicted_indices = Vec::new();
    for block_idx in to_evict {
        let Some((_, pending)) = session.pending_blocks.remove(&(document_id.clone(), block_idx)) else {
            continue;
        };
        let key = logical_key(&session.user_id, &document_id, block_idx, pending.model.as_str(), &pending.voice);
        match state.queue.evict_logical_key(pending.model.as_str(), &key).await {
            Ok(evicted) if !evicted.is_empty() => {
                evicted_indices.push(block_idx);
            }
            Ok(_) => {
                // Already claimed; its result is simply ignored by the
                // client once it arrives (spec.md §5's eviction race).
            }
            Err(err) => {
                warn!(%err, "evict_logical_key failed");
            }
        }
    }

    if !evicted_indices.is_empty() {
        debug!(count = evicted_indices.len(), "evicted blocks past cursor");
        let _ = session.outgoing.send(ServerMessage::Evicted {
            document_id,
            block_indices: evicted_indices,
        });
    }
}
