//! `GET /metrics`: a point-in-time snapshot of the queue's `LiveMetrics`
//! counters, exposed the way `dog_axum`'s example binaries expose a status
//! endpoint alongside their main service routes.

use axum::extract::State;
use axum::Json;

use tts_queue::MetricsSnapshot;

use crate::state::AppState;

pub async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.queue.metrics())
}
