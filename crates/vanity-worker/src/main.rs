//! # Vanity Worker
//!
//! Leases vanity salt jobs from the broker and mines them on one device.

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use vanity_config::ConfigLoader;
use vanity_core::telemetry::init_logging;
use vanity_jobs::{create_pool, register_metrics, JobQueue, RedisJobQueue};
use vanity_worker::{forward_shutdown, Worker};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Worker error: {:#}", e);
        eprintln!("vanity-worker: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ConfigLoader::from_default_location()
        .load()
        .context("failed to load configuration")?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
        &["vanity_worker=debug"],
    )?;

    info!("Starting Vanity Worker...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);
    info!(
        device_id = %config.worker.device_id,
        miner_path = %config.worker.miner_path,
        deadline_ms = config.worker.deadline_ms,
        "Worker configuration"
    );

    if config.observability.metrics_enabled {
        register_metrics();
    }

    let pool = create_pool(&config.broker)
        .await
        .with_context(|| format!("failed to connect to broker at {}", config.broker.connection))?;
    let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::new(
        pool,
        &config.broker.key_prefix,
        config.queue.clone(),
    ));

    let worker = Worker::from_config(queue, &config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    forward_shutdown(shutdown_tx);

    let stats = worker.run(shutdown_rx).await?;

    info!(
        completed = stats.completed,
        failed = stats.failed,
        released = stats.released,
        "Worker shutdown complete"
    );
    Ok(())
}
