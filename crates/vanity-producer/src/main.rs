//! # Vanity Producer
//!
//! Submits mining jobs to the broker and reports on them.

mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use cli::{Cli, Command};
use tracing::{debug, info, warn};
use vanity_config::ConfigLoader;
use vanity_core::telemetry::init_logging;
use vanity_jobs::{create_pool, JobId, JobQueue, RedisJobQueue};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("vanity-producer: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ConfigLoader::new(cli.config_dir.as_str())
        .load()
        .context("failed to load configuration")?;

    if cli.verbose {
        init_logging(
            &config.observability.log_level,
            &config.observability.log_format,
            &[],
        )?;
    }

    let pool = create_pool(&config.broker)
        .await
        .with_context(|| format!("failed to connect to broker at {}", config.broker.connection))?;
    let queue = RedisJobQueue::new(pool, &config.broker.key_prefix, config.queue.clone());

    let outcome = execute(&queue, cli.command).await;
    if let Err(e) = &outcome {
        warn!(error = %e, "Command failed");
    }
    queue.close().await?;
    outcome
}

async fn execute(queue: &dyn JobQueue, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Enqueue(args) => {
            let payload = args.payload();
            let options = args.options();
            debug!(
                token_id = %payload.token_id,
                priority = %options.priority,
                timeout_ms = ?options.timeout_ms,
                "Enqueuing job"
            );
            let job_id = queue
                .enqueue(payload, options)
                .await
                .context("failed to enqueue job")?;
            info!(job_id = %job_id, queue = %queue.name(), "Job enqueued");
            println!("{}", job_id);
        }
        Command::Status { job_id } => {
            let job_id = JobId::from(job_id);
            let Some(record) = queue.get_job(&job_id).await? else {
                bail!("job {} not found", job_id);
            };
            info!(job_id = %job_id, state = %record.state, "Fetched job");
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Stats => {
            let stats = queue.stats().await?;
            info!(
                queue = %stats.queue,
                waiting = stats.waiting,
                active = stats.active,
                "Fetched queue stats"
            );
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}
