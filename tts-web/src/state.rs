use std::sync::Arc;

use tts_auth::SessionAuthenticator;
use tts_cache::VariantCache;
use tts_core::collaborators::{DocumentStore, UsageGate, UsageRecorder};
use tts_core::TtsConfig;
use tts_queue::QueueBackend;

use crate::notify::NotificationFabric;

/// Shared state for the websocket orchestrator and audio-fetch handlers,
/// grounded on `dog_axum::state::DogAxumState`'s shape but holding the
/// concrete collaborators this core needs rather than a generic `DogApp`.
pub struct AppState {
    pub queue: Arc<dyn QueueBackend>,
    pub cache: Arc<dyn VariantCache>,
    pub auth: Arc<dyn SessionAuthenticator>,
    pub usage_gate: Arc<dyn UsageGate>,
    pub usage_recorder: Arc<dyn UsageRecorder>,
    pub documents: Arc<dyn DocumentStore>,
    pub notify: Arc<dyn NotificationFabric>,
    pub config: TtsConfig,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            cache: Arc::clone(&self.cache),
            auth: Arc::clone(&self.auth),
            usage_gate: Arc::clone(&self.usage_gate),
            usage_recorder: Arc::clone(&self.usage_recorder),
            documents: Arc::clone(&self.documents),
            notify: Arc::clone(&self.notify),
            config: self.config.clone(),
        }
    }
}
