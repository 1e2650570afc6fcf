//! Per-`(user, document)` pub/sub fan-out, spec.md §4.2's
//! `done:{user}:{document}` channel and §9's redesign flag against a single
//! global channel (every subscriber would filter every message — O(n²) at
//! scale). Channel names are part of the wire contract since external
//! workers and other orchestrator instances depend on them.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use tts_core::{DocumentId, UserId};
use tts_queue::BoxStream;

use tts_core::wire::ServerMessage;

fn channel_name(user_id: &UserId, document_id: &DocumentId) -> String {
    format!("done:{}:{}", user_id, document_id)
}

/// Delivery fabric the orchestrator publishes into (result consumer side)
/// and subscribes from (websocket session side). A Redis-backed
/// implementation is required in production so that the process that
/// publishes a result (the result consumer, possibly on another host) can
/// reach a websocket session held open on a different orchestrator
/// instance.
#[async_trait]
pub trait NotificationFabric: Send + Sync {
    async fn publish(
        &self,
        user_id: &UserId,
        document_id: &DocumentId,
        message: &ServerMessage,
    ) -> anyhow::Result<()>;

    async fn subscribe(
        &self,
        user_id: &UserId,
        document_id: &DocumentId,
    ) -> anyhow::Result<BoxStream<ServerMessage>>;
}

/// Redis pub/sub implementation. Each `subscribe` call opens its own
/// dedicated pub/sub connection — Redis pub/sub connections cannot be
/// multiplexed with regular commands, so this intentionally does not share
/// the `ConnectionManager` the queue backend uses.
pub struct RedisNotificationFabric {
    client: redis::Client,
}

impl RedisNotificationFabric {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }
}

#[async_trait]
impl NotificationFabric for RedisNotificationFabric {
    async fn publish(
        &self,
        user_id: &UserId,
        document_id: &DocumentId,
        message: &ServerMessage,
    ) -> anyhow::Result<()> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PUBLISH")
            .arg(channel_name(user_id, document_id))
            .arg(payload)
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        user_id: &UserId,
        document_id: &DocumentId,
    ) -> anyhow::Result<BoxStream<ServerMessage>> {
        let channel = channel_name(user_id, document_id);
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;

        let stream = pubsub.into_on_message().filter_map(move |msg| async move {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(err) => {
                    warn!(%err, "non-utf8 notification payload");
                    return None;
                }
            };
            match serde_json::from_str::<ServerMessage>(&payload) {
                Ok(parsed) => Some(parsed),
                Err(err) => {
                    warn!(%err, "failed to parse notification payload");
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Single-process notification fabric for local development and tests
/// without a Redis instance, grounded on `tts_queue::backend::memory::
/// MemoryBackend`'s `broadcast`-channel event stream. Only reaches
/// subscribers in this same process — unusable once the result consumer
/// and the websocket session holding a document open live on different
/// hosts, which is exactly the gap `RedisNotificationFabric` exists to
/// close in production.
#[derive(Default)]
pub struct InMemoryNotificationFabric {
    channels: DashMap<String, broadcast::Sender<ServerMessage>>,
}

impl InMemoryNotificationFabric {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: String) -> broadcast::Sender<ServerMessage> {
        self.channels
            .entry(channel)
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

#[async_trait]
impl NotificationFabric for InMemoryNotificationFabric {
    async fn publish(&self, user_id: &UserId, document_id: &DocumentId, message: &ServerMessage) -> anyhow::Result<()> {
        let _ = self.sender(channel_name(user_id, document_id)).send(message.clone());
        Ok(())
    }

    async fn subscribe(&self, user_id: &UserId, document_id: &DocumentId) -> anyhow::Result<BoxStream<ServerMessage>> {
        let rx = self.sender(channel_name(user_id, document_id)).subscribe();
        let stream = BroadcastStream::new(rx).filter_map(|item| async move { item.ok() });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod fabric_tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn in_memory_fabric_delivers_published_messages_to_subscribers() {
        let fabric = Arc::new(InMemoryNotificationFabric::new());
        let user = UserId::from_string("u1");
        let doc = DocumentId::from_string("d1");

        let mut stream = fabric.subscribe(&user, &doc).await.unwrap();
        fabric
            .publish(&user, &doc, &ServerMessage::Error { reason: "test".to_string(), detail: None })
            .await
            .unwrap();

        let received = stream.next().await.unwrap();
        assert!(matches!(received, ServerMessage::Error { .. }));
    }
}
