use serde::{Deserialize, Serialize};

/// Explicit feature detection for a `QueueBackend`, grounded on
/// `dog_queue::types::capabilities::QueueCapabilities`. `tts-server` checks
/// this at startup and refuses to run the real orchestrator against a
/// backend that can't satisfy it (spec.md §4.2 requires all five).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCapabilities {
    pub priority_bias: bool,
    pub idempotency: bool,
    pub dead_letter_queue: bool,
    pub visibility_timeout: bool,
}

impl QueueCapabilities {
    pub fn full() -> Self {
        Self {
            priority_bias: true,
            idempotency: true,
            dead_letter_queue: true,
            visibility_timeout: true,
        }
    }

    pub fn minimal() -> Self {
        Self {
            priority_bias: false,
            idempotency: false,
            dead_letter_queue: false,
            visibility_timeout: false,
        }
    }
}
