use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tts_core::wire::JobRecord as Job;
use tts_core::{JobId, LeaseToken};

/// Job status lifecycle, spec.md §4.2 / §4.7 / §7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobStatus {
    /// Sitting in `queue:{M}`, waiting to be claimed.
    Enqueued,
    /// Claimed, sitting in `processing:{M}` with a visibility deadline.
    Processing { lease_until: DateTime<Utc> },
    /// Visibility timeout expired; back on `queue:{M}` with attempt + 1.
    Retrying { retry_at: DateTime<Utc> },
    /// Removed via the `complete` primitive.
    Completed { completed_at: DateTime<Utc> },
    /// Moved to `dlq:{M}` after exhausting the retry budget.
    Failed { failed_at: DateTime<Utc>, error: String },
    /// Removed by `cursor_moved` eviction before being claimed.
    Evicted { evicted_at: DateTime<Utc> },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Evicted { .. }
        )
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, Self::Processing { .. })
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Enqueued => true,
            Self::Retrying { retry_at } => *retry_at <= now,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Processing { .. } => "processing",
            Self::Retrying { .. } => "retrying",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Evicted { .. } => "evicted",
        }
    }
}

/// Queue-side bookkeeping for one job: the immutable job content plus its
/// mutable lifecycle state. Named distinctly from `tts_core::wire::
/// JobRecord` (the content) to keep "what to synthesize" and "where this
/// job currently sits in the queue" separate, per spec.md §9's
/// dynamically-typed-payload redesign flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: JobId,
    pub job: Job,
    pub status: JobStatus,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lease_token: Option<LeaseToken>,
    pub lease_until: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn new(job: Job) -> Self {
        let now = Utc::now();
        Self {
            job_id: job.job_id.clone(),
            job,
            status: JobStatus::Enqueued,
            attempt: 0,
            created_at: now,
            updated_at: now,
            lease_token: None,
            lease_until: None,
        }
    }

    pub fn can_retry(&self, max_retries: u32) -> bool {
        self.attempt < max_retries && !self.status.is_terminal()
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(&self.status, JobStatus::Processing { lease_until } if *lease_until < now)
    }

    pub fn start_processing(&mut self, lease_token: LeaseToken, lease_until: DateTime<Utc>) {
        self.status = JobStatus::Processing { lease_until };
        self.lease_token = Some(lease_token);
        self.lease_until = Some(lease_until);
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Completed {
            completed_at: Utc::now(),
        };
        self.lease_token = None;
        self.lease_until = None;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: String) {
        self.status = JobStatus::Failed {
            failed_at: Utc::now(),
            error,
        };
        self.lease_token = None;
        self.lease_until = None;
        self.updated_at = Utc::now();
    }

    pub fn schedule_retry(&mut self, retry_at: DateTime<Utc>) {
        self.status = JobStatus::Retrying { retry_at };
        self.attempt += 1;
        self.lease_token = None;
        self.lease_until = None;
        self.updated_at = Utc::now();
    }

    pub fn evict(&mut self) {
        self.status = JobStatus::Evicted {
            evicted_at: Utc::now(),
        };
        self.updated_at = Utc::now();
    }
}

/// A job handed to a worker by `claim`, spec.md §4.2 primitive (2).
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub entry: QueueEntry,
    pub lease_token: LeaseToken,
    pub lease_until: DateTime<Utc>,
}

impl LeasedJob {
    pub fn job_id(&self) -> &JobId {
        &self.entry.job_id
    }

    pub fn job(&self) -> &Job {
        &self.entry.job
    }

    pub fn lease_valid(&self, now: DateTime<Utc>) -> bool {
        self.lease_until > now
    }
}
