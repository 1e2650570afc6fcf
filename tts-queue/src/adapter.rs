use std::time::Duration;

use chrono::{DateTime, Utc};

/// Tunables for the queue's retry and lease behavior, grounded on
/// `dog_queue::adapter::QueueConfig` but trimmed to the knobs spec.md's
/// orchestrator and scanners actually consult — worker pool sizing lives
/// in `tts-worker`, not here, since this crate no longer owns a generic
/// worker loop.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long a claimed job holds its lease before a visibility scan
    /// considers it stale (spec.md §4.2, §4.8).
    pub lease_duration: Duration,
    /// Base delay before the first retry after a stale lease or failure.
    pub base_retry_backoff: Duration,
    /// Ceiling on the exponential retry backoff.
    pub max_retry_backoff: Duration,
    /// Attempts allowed before a job moves to `dlq:{model}`.
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(60),
            base_retry_backoff: Duration::from_secs(1),
            max_retry_backoff: Duration::from_secs(3600),
            max_retries: 3,
        }
    }
}

impl QueueConfig {
    /// Exponential backoff from `base_retry_backoff`, capped at
    /// `max_retry_backoff`, for the `attempt`'th retry (1-indexed).
    pub fn retry_at(&self, attempt: u32) -> DateTime<Utc> {
        let backoff_secs = self
            .base_retry_backoff
            .as_secs()
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_retry_backoff.as_secs());
        Utc::now() + chrono::Duration::seconds(backoff_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_backoff_is_capped() {
        let config = QueueConfig::default();
        let now = Utc::now();
        let first = config.retry_at(1);
        assert!(first > now);

        let far = config.retry_at(20);
        let max_delay = far - now;
        assert!(max_delay.num_seconds() <= config.max_retry_backoff.as_secs() as i64 + 1);
    }
}
