use anyhow::{Context, Result};
use event_bus::PgEventBus;
use fanout_worker::{run_once, WorkerContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use timeline_cache::RedisCache;
use timeline_core::{logging, Config};
use timeline_store::PgStore;

const RECEIVE_MAX_COUNT: i64 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("failed to load configuration")?;
    logging::init(&config.app.env);

    tracing::info!(env = %config.app.env, "starting fanout-worker");

    let store = PgStore::connect(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
        config.database.connect_timeout_secs,
        config.database.acquire_timeout_secs,
        config.timeline.celebrity_threshold,
    )
    .await
    .context("failed to connect to database")?;

    let bus = PgEventBus::from_pool(
        store.pool().clone(),
        config.bus.visibility_timeout_secs,
        config.bus.max_receives,
        config.bus.publish_max_attempts,
    );

    let cache = RedisCache::connect(&config.redis.url)
        .await
        .context("failed to connect to redis")?;

    let ctx = Arc::new(WorkerContext {
        store: Arc::new(store),
        cache: Arc::new(cache),
        bus: Arc::new(bus),
        timeline_cap: config.timeline.timeline_cap,
        follower_chunk: config.timeline.fanout_batch_size,
        worker_concurrency: config.timeline.worker_concurrency,
    });

    tracing::info!("fanout-worker ready, entering receive loop");

    // `stop` is only checked between batches, never while one is
    // in-flight, so a shutdown signal always lets the current batch
    // finish before the loop exits (spec.md §4.F.3).
    let stop = Arc::new(AtomicBool::new(false));
    let worker_ctx = ctx.clone();
    let worker_stop = stop.clone();
    let wait_secs = config.bus.receive_wait_secs;
    let worker = tokio::spawn(async move {
        while !worker_stop.load(Ordering::Relaxed) {
            let processed = run_once(&worker_ctx, RECEIVE_MAX_COUNT, wait_secs).await;
            if processed == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining in-flight batch");
    stop.store(true, Ordering::Relaxed);
    worker.await.context("worker task panicked")?;

    tracing::info!("fanout-worker exiting cleanly");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    }
}
