//! Redis-backed job queue for the TTS synthesis core.
//!
//! Implements the five atomic primitives a synthesis block's lifecycle
//! moves through: enqueue with content-addressed dedup, lease-based claim,
//! completion, visibility-timeout requeue, and inflight-gate cleanup. See
//! [`backend::QueueBackend`] for the primitives themselves and
//! [`backend::redis_backend::RedisBackend`] / [`backend::memory::MemoryBackend`]
//! for the two implementations.

pub mod adapter;
pub mod backend;
pub mod error;
pub mod observability;
pub mod types;

pub use adapter::QueueConfig;
pub use backend::redis_backend::RedisBackend;
pub use backend::{memory::MemoryBackend, BoxStream, QueueBackend};
pub use error::{QueueError, QueueResult};
pub use observability::{LiveMetrics, MetricsSnapshot};
pub use types::{JobEvent, JobPriority, JobStatus, LeasedJob, QueueCapabilities, QueueEntry};
