//! Typed, environment-driven configuration.
//!
//! Grounded on `dog_core::config::DogConfig`'s environment-override
//! convention and `dog_queue::adapter::QueueConfig`'s typed-struct-with-
//! `Default` shape — a plain struct, not a generic config framework.

use std::time::Duration;

/// Top-level configuration for a `tts-server` process.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Redis connection string, e.g. `redis://127.0.0.1/`.
    pub redis_url: String,
    /// Directory for the sled-backed variant cache.
    pub cache_dir: String,
    /// Visibility timeout for serial (GPU) worker claims. Must exceed the
    /// adapter's p99 synthesis time (spec.md §4.4).
    pub visibility_timeout: Duration,
    /// Visibility scanner tick interval (spec.md §4.7).
    pub visibility_scan_interval: Duration,
    /// Overflow scanner tick interval (spec.md §4.8).
    pub overflow_scan_interval: Duration,
    /// Age after which a queued job becomes eligible for overflow spill.
    pub overflow_threshold: Duration,
    /// How long the `inflight:{variant_hash}` dedup key lives before
    /// expiring (a safety net in case a job is lost without completing).
    pub inflight_ttl: Duration,
    /// Retention window behind/ahead of the cursor for `cursor_moved`
    /// eviction (spec.md §4.3), in blocks.
    pub retention_behind: u32,
    pub retention_ahead: u32,
    /// Cadence at which the variant cache flushes coalesced last-accessed
    /// updates to durable storage (spec.md §4.1).
    pub cache_flush_interval: Duration,
    /// Size budget the variant cache's reclaim loop evicts down to
    /// (spec.md §4.1's `evict_lru(target_size)`), in bytes.
    pub cache_max_bytes: u64,
    /// Cadence at which the reclaim loop checks the cache against
    /// `cache_max_bytes`.
    pub cache_reclaim_interval: Duration,
    /// Maximum retries before a job is moved to `dlq:{M}`.
    pub max_retries: u32,
    /// Bind address for the websocket/HTTP gateway.
    pub listen_addr: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1/".to_string(),
            cache_dir: "./data/variant-cache".to_string(),
            visibility_timeout: Duration::from_secs(60),
            visibility_scan_interval: Duration::from_secs(15),
            overflow_scan_interval: Duration::from_secs(5),
            overflow_threshold: Duration::from_secs(30),
            inflight_ttl: Duration::from_secs(300),
            retention_behind: 2,
            retention_ahead: 10,
            cache_flush_interval: Duration::from_secs(10),
            cache_max_bytes: 10 * 1024 * 1024 * 1024,
            cache_reclaim_interval: Duration::from_secs(30),
            max_retries: 3,
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl TtsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay environment variables (`TTS_REDIS_URL`, `TTS_CACHE_DIR`,
    /// `TTS_VISIBILITY_TIMEOUT_SECS`, ...) onto the defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("TTS_REDIS_URL") {
            cfg.redis_url = v;
        }
        if let Ok(v) = std::env::var("TTS_CACHE_DIR") {
            cfg.cache_dir = v;
        }
        if let Ok(v) = std::env::var("TTS_LISTEN_ADDR") {
            cfg.listen_addr = v;
        }
        if let Some(secs) = env_u64("TTS_VISIBILITY_TIMEOUT_SECS") {
            cfg.visibility_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("TTS_VISIBILITY_SCAN_INTERVAL_SECS") {
            cfg.visibility_scan_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("TTS_OVERFLOW_SCAN_INTERVAL_SECS") {
            cfg.overflow_scan_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("TTS_OVERFLOW_THRESHOLD_SECS") {
            cfg.overflow_threshold = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("TTS_INFLIGHT_TTL_SECS") {
            cfg.inflight_ttl = Duration::from_secs(secs);
        }
        if let Some(n) = env_u64("TTS_RETENTION_BEHIND") {
            cfg.retention_behind = n as u32;
        }
        if let Some(n) = env_u64("TTS_RETENTION_AHEAD") {
            cfg.retention_ahead = n as u32;
        }
        if let Some(n) = env_u64("TTS_MAX_RETRIES") {
            cfg.max_retries = n as u32;
        }
        if let Some(n) = env_u64("TTS_CACHE_MAX_BYTES") {
            cfg.cache_max_bytes = n;
        }
        if let Some(secs) = env_u64("TTS_CACHE_RECLAIM_INTERVAL_SECS") {
            cfg.cache_reclaim_interval = Duration::from_secs(secs);
        }
        cfg
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = TtsConfig::default();
        assert!(cfg.visibility_timeout > cfg.visibility_scan_interval);
        assert!(cfg.retention_ahead > cfg.retention_behind);
    }
}
