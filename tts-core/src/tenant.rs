//! Request-scoped context carried through the orchestrator and the
//! consumers, grounded on `dog_core::tenant::TenantContext`'s shape.

use crate::ids::UserId;

/// Context attached to every websocket session, job, and result so that
/// `tracing` spans can correlate a request across the queue → worker →
/// result-consumer hop (spec.md §9's dropped-global-state redesign: no
/// state survives as a singleton, it is threaded explicitly instead).
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_id: UserId,
    pub request_id: String,
}

impl RequestContext {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}
