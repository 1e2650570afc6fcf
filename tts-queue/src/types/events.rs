use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tts_core::JobId;

/// Structured observability events, grounded on
/// `dog_queue::types::events::JobEvent`, trimmed to the transitions this
/// system's scanners and consumers actually emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    Enqueued {
        job_id: JobId,
        model: String,
        at: DateTime<Utc>,
    },
    Claimed {
        job_id: JobId,
        lease_until: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    Requeued {
        job_id: JobId,
        retry_at: DateTime<Utc>,
        attempt: u32,
        at: DateTime<Utc>,
    },
    Completed {
        job_id: JobId,
        at: DateTime<Utc>,
    },
    DeadLettered {
        job_id: JobId,
        error: String,
        at: DateTime<Utc>,
    },
    Evicted {
        job_id: JobId,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Claimed { .. } => "claimed",
            Self::Requeued { .. } => "requeued",
            Self::Completed { .. } => "completed",
            Self::DeadLettered { .. } => "dead_lettered",
            Self::Evicted { .. } => "evicted",
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Enqueued { job_id, .. }
            | Self::Claimed { job_id, .. }
            | Self::Requeued { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::DeadLettered { job_id, .. }
            | Self::Evicted { job_id, .. } => job_id,
        }
    }
}
