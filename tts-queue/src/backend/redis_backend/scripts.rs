use once_cell::sync::Lazy;
use redis::Script;

/// `KEYS = [queue:{model}, jobs, index, inflight:{variant_hash}]`
/// `ARGV = [job_id, job_json, score, inflight_ttl_secs, logical_key]`
///
/// Returns `1` if the job was enqueued, `0` if an identical variant was
/// already in flight and the enqueue was deduplicated.
pub static ENQUEUE_IF_NEW: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('EXISTS', KEYS[4]) == 1 then
            return 0
        end
        redis.call('SET', KEYS[4], ARGV[1], 'EX', ARGV[4])
        redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])
        redis.call('HSET', KEYS[3], ARGV[5], ARGV[1])
        redis.call('ZADD', KEYS[1], ARGV[3], ARGV[1])
        return 1
        "#,
    )
});

/// `KEYS = [queue:{model}, processing:{model}, jobs, leases]`
/// `ARGV = [lease_until_ms, lease_token]`
///
/// Returns `{job_id, job_json}` for the oldest eligible job, or a false
/// value if the queue is empty.
pub static CLAIM: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local popped = redis.call('ZRANGE', KEYS[1], 0, 0)
        if #popped == 0 then
            return false
        end
        local job_id = popped[1]
        redis.call('ZREM', KEYS[1], job_id)
        redis.call('ZADD', KEYS[2], ARGV[1], job_id)
        redis.call('HSET', KEYS[4], job_id, ARGV[2])
        local job_json = redis.call('HGET', KEYS[3], job_id)
        return {job_id, job_json}
        "#,
    )
});

/// `KEYS = [processing:{model}, jobs, leases, index]`
/// `ARGV = [job_id, lease_token, logical_key]`
///
/// Returns `1` if this caller still owned the lease and the job was
/// removed, `0` if the lease had already been reclaimed by a
/// visibility-timeout requeue.
pub static COMPLETE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local current = redis.call('HGET', KEYS[3], ARGV[1])
        if current ~= ARGV[2] then
            return 0
        end
        redis.call('ZREM', KEYS[1], ARGV[1])
        redis.call('HDEL', KEYS[2], ARGV[1])
        redis.call('HDEL', KEYS[3], ARGV[1])
        redis.call('HDEL', KEYS[4], ARGV[3])
        return 1
        "#,
    )
});

/// `KEYS = [processing:{model}, leases]`
/// `ARGV = [now_ms]`
///
/// Atomically claims every job whose lease deadline has passed so two
/// concurrent visibility scanners never both requeue the same job; the
/// attempt-count bump and queue/DLQ placement happen in plain Rust calls
/// afterward since each `job_id` here is now exclusively owned by this
/// caller.
pub static CLAIM_STALE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local stale = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
        for _, job_id in ipairs(stale) do
            redis.call('ZREM', KEYS[1], job_id)
            redis.call('HDEL', KEYS[2], job_id)
        end
        return stale
        "#,
    )
});

/// `KEYS = [inflight:{variant_hash}]`
/// `ARGV = [job_id]`
///
/// Returns `1` if this `job_id` still owned the gate and it was deleted,
/// `0` if a later enqueue had already taken over the key.
pub static DELETE_INFLIGHT_IF_OWNER: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local current = redis.call('GET', KEYS[1])
        if current == ARGV[1] then
            redis.call('DEL', KEYS[1])
            return 1
        end
        return 0
        "#,
    )
});

/// `KEYS = [index, queue:{model}, jobs]`
/// `ARGV = [logical_key]`
///
/// Returns `{job_id, job_json}` if a queued (not yet claimed) job with this
/// logical key was found and removed, or an empty array otherwise. The
/// caller still needs `job_json` (for its `variant_hash`) to follow up with
/// `DELETE_INFLIGHT_IF_OWNER` — this script doesn't know the inflight key
/// name ahead of time since it isn't part of the logical-key lookup.
pub static EVICT_LOGICAL_KEY: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local job_id = redis.call('HGET', KEYS[1], ARGV[1])
        if not job_id then
            return {}
        end
        local score = redis.call('ZSCORE', KEYS[2], job_id)
        if not score then
            return {}
        end
        local job_json = redis.call('HGET', KEYS[3], job_id)
        redis.call('ZREM', KEYS[2], job_id)
        redis.call('HDEL', KEYS[3], job_id)
        redis.call('HDEL', KEYS[1], ARGV[1])
        return {job_id, job_json}
        "#,
    )
});
