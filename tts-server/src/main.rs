//! Binary entry point: wires the queue, cache, web gateway and worker pool
//! together and runs the visibility scanner, overflow scanner and cache
//! warmer as background tasks, grounded on `dog-axum`'s example binaries'
//! "build the app, read `http.host`/`http.port`, call `listen`" shape
//! (`dog-examples/*/src/main.rs`), adapted to this core's concrete
//! `AppState` rather than a generic builder.

mod collaborators;
mod placeholder;
mod scanners;
mod warmer;

use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tts_auth::OpaqueTokenAuthenticator;
use tts_cache::{SledVariantCache, VariantCache};
use tts_queue::{MemoryBackend, QueueBackend, RedisBackend};
use tts_worker::{ModelAdapter, ParallelDispatcher, SerialWorker};
use tts_web::{AppState, BillingConsumer, InMemoryNotificationFabric, NotificationFabric, RedisNotificationFabric, ResultConsumer};

use collaborators::{AllowAllUsageGate, StaticDocumentStore, TracingUsageRecorder};
use placeholder::SilentAdapter;
use scanners::{CacheReclaimer, OverflowScanner, VisibilityScanner};
use warmer::{run_warmer, WarmTarget};

/// How a configured model slug should be driven. Real deployments supply
/// their own `ModelAdapter` per model and choose the mode that matches the
/// underlying resource (spec.md §4.4, §5.2): `Serial` for a model that
/// monopolizes a local GPU, `Parallel` for an API-bound adapter.
enum WorkerMode {
    Serial,
    Parallel { max_concurrency: usize },
}

struct ModelSpec {
    slug: String,
    mode: WorkerMode,
}

/// Parses `TTS_MODELS`, a comma-separated `slug:mode[:concurrency]` list
/// (e.g. `kokoro:serial,openai-tts:parallel:8`). Falls back to a single
/// demo model so the binary is runnable without any configuration.
fn parse_model_specs() -> Vec<ModelSpec> {
    let raw = std::env::var("TTS_MODELS").unwrap_or_else(|_| "demo-silent:serial".to_string());
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|entry| {
            let mut parts = entry.trim().split(':');
            let slug = parts.next()?.to_string();
            let mode = match parts.next().unwrap_or("serial") {
                "parallel" => {
                    let concurrency: usize = parts.next().and_then(|s| s.parse().ok()).unwrap_or(4);
                    WorkerMode::Parallel { max_concurrency: concurrency }
                }
                _ => WorkerMode::Serial,
            };
            Some(ModelSpec { slug, mode })
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "tts_server=info,tts_web=info,tts_worker=info,tts_queue=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = tts_core::TtsConfig::from_env();

    let (queue, notify): (Arc<dyn QueueBackend>, Arc<dyn NotificationFabric>) = if config.redis_url.trim().is_empty() {
        (Arc::new(MemoryBackend::new()), Arc::new(InMemoryNotificationFabric::new()))
    } else {
        match RedisBackend::connect(&config.redis_url, config.inflight_ttl).await {
            Ok(backend) => (Arc::new(backend), Arc::new(RedisNotificationFabric::new(&config.redis_url)?)),
            Err(err) => {
                tracing::warn!(%err, "failed to connect to redis, falling back to the in-memory queue and notification backends");
                (Arc::new(MemoryBackend::new()), Arc::new(InMemoryNotificationFabric::new()))
            }
        }
    };
    let capabilities = queue.capabilities();
    tracing::info!(?capabilities, "queue backend ready");
    if capabilities != tts_queue::types::QueueCapabilities::full() {
        anyhow::bail!("configured queue backend does not support the full set of primitives the orchestrator requires: {capabilities:?}");
    }

    const CACHE_CAPACITY: usize = 10_000;
    let cache: Arc<dyn VariantCache> = match SledVariantCache::open(&config.cache_dir, CACHE_CAPACITY) {
        Ok(sled_cache) => {
            let sled_cache = Arc::new(sled_cache);
            sled_cache.clone().spawn_flush_loop(config.cache_flush_interval);
            sled_cache
        }
        Err(err) => {
            anyhow::bail!("failed to open variant cache at {:?}: {err}", config.cache_dir);
        }
    };

    let state = AppState {
        queue: Arc::clone(&queue),
        cache: Arc::clone(&cache),
        auth: Arc::new(OpaqueTokenAuthenticator),
        usage_gate: Arc::new(AllowAllUsageGate),
        usage_recorder: Arc::new(TracingUsageRecorder),
        documents: Arc::new(StaticDocumentStore::new()),
        notify,
        config: config.clone(),
    };

    tokio::spawn(Arc::new(ResultConsumer::new(state.clone())).run());
    tokio::spawn(Arc::new(BillingConsumer::new(state.clone())).run());

    for spec in parse_model_specs() {
        let adapter: Arc<dyn ModelAdapter> = Arc::new(SilentAdapter);
        spawn_worker(&spec, Arc::clone(&queue), adapter, &config);

        let overflow_adapter: Arc<dyn ModelAdapter> = Arc::new(SilentAdapter);
        let overflow_scanner = Arc::new(OverflowScanner::new(
            spec.slug.clone(),
            Arc::clone(&queue),
            overflow_adapter,
            config.overflow_scan_interval,
            config.overflow_threshold,
        ));
        tokio::spawn(overflow_scanner.run());

        let visibility_scanner = Arc::new(VisibilityScanner::new(
            spec.slug.clone(),
            Arc::clone(&queue),
            config.visibility_scan_interval,
            config.max_retries,
        ));
        tokio::spawn(visibility_scanner.run());
    }

    let reclaimer = Arc::new(CacheReclaimer::new(Arc::clone(&cache), config.cache_reclaim_interval, config.cache_max_bytes));
    tokio::spawn(reclaimer.run());

    let warm_targets = vec![WarmTarget {
        text: "Welcome. This is a pre-synthesized greeting.".to_string(),
        model: "demo-silent".to_string(),
        voice: "default".to_string(),
    }];
    tokio::spawn({
        let queue = Arc::clone(&queue);
        let cache = Arc::clone(&cache);
        async move {
            run_warmer(queue, cache, &warm_targets, std::time::Duration::from_secs(30)).await;
        }
    });

    tracing::info!(addr = %config.listen_addr, "tts-server listening");
    let listen_addr = config.listen_addr.clone();
    tts_web::listen(state, listen_addr.as_str()).await
}

fn spawn_worker(spec: &ModelSpec, queue: Arc<dyn QueueBackend>, adapter: Arc<dyn ModelAdapter>, config: &tts_core::TtsConfig) {
    match spec.mode {
        WorkerMode::Serial => {
            let worker = Arc::new(SerialWorker::new(spec.slug.clone(), queue, adapter, config.visibility_timeout));
            tokio::spawn(async move { worker.run().await });
        }
        WorkerMode::Parallel { max_concurrency } => {
            let dispatcher = Arc::new(ParallelDispatcher::new(spec.slug.clone(), queue, adapter, max_concurrency));
            tokio::spawn(dispatcher.run());
        }
    }
}
