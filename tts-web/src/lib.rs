//! Websocket synthesis orchestrator and audio-fetch HTTP surface.
//!
//! Wires the `/v1/ws/tts` handshake and dispatch (`ws`), the content-hash
//! audio endpoints (`audio`), the per-document notification fabric
//! (`notify`), and the two background drains that turn worker output into
//! client notifications and billing records (`result_consumer`,
//! `billing_consumer`).

pub mod app;
pub mod audio;
pub mod billing_consumer;
mod error;
pub mod metrics;
pub mod notify;
pub mod result_consumer;
pub mod state;
pub mod ws;

pub use app::{listen, router};
pub use billing_consumer::BillingConsumer;
pub use error::WebError;
pub use notify::{InMemoryNotificationFabric, NotificationFabric, RedisNotificationFabric};
pub use result_consumer::ResultConsumer;
pub use state::AppState;
