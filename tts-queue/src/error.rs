use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations, grounded on
/// `dog_queue::error::QueueError` and trimmed to the failure modes the
/// Redis-backed primitives of spec.md §4.2 can actually raise.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("lease token does not match current owner")]
    InvalidLeaseToken,

    #[error("lease has expired")]
    LeaseExpired,

    #[error("job was evicted")]
    JobEvicted,

    #[error("job is already in a terminal state")]
    JobAlreadyTerminal,

    #[error("backend does not support required capability: {0}")]
    BackendUnsupported(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("redis error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
