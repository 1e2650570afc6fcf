use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for the queue's atomic primitives, grounded on
/// `dog_queue::observability::metrics::LiveMetrics` but trimmed to the
/// counters spec.md's scanners and consumers actually move: no per-job-type
/// breakdown or execution-time histograms, since this queue has exactly one
/// "job type" (a synthesis block) and execution time is a worker-side,
/// not a queue-side, concern.
#[derive(Debug, Default)]
pub struct LiveMetrics {
    pub jobs_enqueued: AtomicU64,
    pub jobs_deduplicated: AtomicU64,
    pub jobs_claimed: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_requeued: AtomicU64,
    pub jobs_dead_lettered: AtomicU64,
    pub jobs_evicted: AtomicU64,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_enqueued(&self) {
        self.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduplicated(&self) {
        self.jobs_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claimed(&self) {
        self.jobs_claimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requeued(&self) {
        self.jobs_requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.jobs_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self) {
        self.jobs_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_enqueued: self.jobs_enqueued.load(Ordering::Relaxed),
            jobs_deduplicated: self.jobs_deduplicated.load(Ordering::Relaxed),
            jobs_claimed: self.jobs_claimed.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_requeued: self.jobs_requeued.load(Ordering::Relaxed),
            jobs_dead_lettered: self.jobs_dead_lettered.load(Ordering::Relaxed),
            jobs_evicted: self.jobs_evicted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`LiveMetrics`], suitable for logging or exposing
/// over a status endpoint.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub jobs_enqueued: u64,
    pub jobs_deduplicated: u64,
    pub jobs_claimed: u64,
    pub jobs_completed: u64,
    pub jobs_requeued: u64,
    pub jobs_dead_lettered: u64,
    pub jobs_evicted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = LiveMetrics::new();
        metrics.record_enqueued();
        metrics.record_enqueued();
        metrics.record_claimed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_enqueued, 2);
        assert_eq!(snapshot.jobs_claimed, 1);
        assert_eq!(snapshot.jobs_completed, 0);
    }
}
