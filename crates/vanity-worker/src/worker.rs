//! Device-bound worker loop.
//!
//! A worker leases one job at a time, runs it through the
//! [`ProcessController`] and turns the outcome into exactly one queue
//! transition. It never holds two leases, so a device never runs two miners.

use crate::controller::{ControllerConfig, ExecutionOutcome, ProcessController};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};
use vanity_config::AppConfig;
use vanity_core::{JobFailure, MiningResult};
use vanity_jobs::{JobError, JobMetrics, JobQueue, JobResult, Lease, RetryPolicy};

/// Worker loop settings.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Identifier recorded on leased jobs.
    pub worker_id: String,
    /// Device the worker is bound to.
    pub device_id: String,
    /// Compute budget per job.
    pub deadline: Duration,
    /// Margin kept under a job's broker timeout.
    pub deadline_safety_margin: Duration,
    /// Threshold used when a job does not carry one.
    pub default_min_leading_bs: u32,
    /// Delay between lease attempts on an empty queue.
    pub poll_interval: Duration,
    /// Lease renewal period while a job runs.
    pub lease_renew_interval: Duration,
    /// Stall sweep period.
    pub stall_check_interval: Duration,
    /// Retries of ack, nack and release on broker errors.
    pub settle_retry: RetryPolicy,
}

impl WorkerSettings {
    /// Builds settings from the application config.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            worker_id: format!("{}-{}", config.worker.device_id, uuid::Uuid::new_v4().simple()),
            device_id: config.worker.device_id.clone(),
            deadline: config.worker.deadline(),
            deadline_safety_margin: config.worker.deadline_safety_margin(),
            default_min_leading_bs: config.worker.default_min_leading_bs,
            poll_interval: config.worker.poll_interval(),
            lease_renew_interval: config.queue.lease_renew_interval(),
            stall_check_interval: config.queue.stall_check_interval(),
            settle_retry: RetryPolicy::exponential(
                config.worker.settle_retries,
                config.worker.settle_retry_delay(),
            )
            .with_max_delay(config.worker.settle_retry_max_delay()),
        }
    }

    /// Compute budget for a job whose broker timeout is `timeout_ms`.
    ///
    /// The run must resolve before the broker gives up on the job, so the
    /// budget never exceeds the timeout minus the safety margin.
    pub fn effective_deadline(&self, timeout_ms: u64) -> Duration {
        let job_budget = Duration::from_millis(timeout_ms)
            .saturating_sub(self.deadline_safety_margin)
            .max(Duration::from_millis(1));
        self.deadline.min(job_budget)
    }
}

/// Counts of terminal transitions issued by one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,
    pub failed: u64,
    pub released: u64,
}

/// Pulls jobs from a queue and mines them on one device.
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    controller: ProcessController,
    settings: WorkerSettings,
}

impl Worker {
    /// Creates a worker.
    pub fn new(
        queue: Arc<dyn JobQueue>,
        controller: ProcessController,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            controller,
            settings,
        }
    }

    /// Creates a worker from the application config.
    pub fn from_config(queue: Arc<dyn JobQueue>, config: &AppConfig) -> Self {
        let controller = ProcessController::new(ControllerConfig::from_worker(&config.worker));
        Self::new(queue, controller, WorkerSettings::from_config(config))
    }

    /// Worker settings.
    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped, then
    /// closes the queue.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> JobResult<WorkerStats> {
        let mut stats = WorkerStats::default();
        let mut next_sweep = Instant::now();

        info!(
            worker_id = %self.settings.worker_id,
            device_id = %self.settings.device_id,
            queue = %self.queue.name(),
            "Worker started"
        );

        while !*shutdown.borrow() {
            if Instant::now() >= next_sweep {
                self.sweep_stalled().await;
                next_sweep = Instant::now() + self.settings.stall_check_interval;
            }

            match self.queue.lease(&self.settings.worker_id).await {
                Ok(Some(lease)) => {
                    let stop = self.process(lease, &mut shutdown, &mut stats).await;
                    if stop {
                        break;
                    }
                }
                Ok(None) => {
                    if wait_or_shutdown(&mut shutdown, self.settings.poll_interval).await {
                        break;
                    }
                }
                Err(JobError::Closed) => {
                    info!("Queue closed, stopping worker");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to lease job, retrying");
                    if wait_or_shutdown(&mut shutdown, self.settings.poll_interval).await {
                        break;
                    }
                }
            }
        }

        info!(
            completed = stats.completed,
            failed = stats.failed,
            released = stats.released,
            "Worker stopping, closing queue"
        );
        match self.queue.close().await {
            Ok(()) | Err(JobError::Closed) => Ok(stats),
            Err(e) => Err(e),
        }
    }

    async fn sweep_stalled(&self) {
        match self.queue.recover_stalled().await {
            Ok(report) if report.is_empty() => {}
            Ok(report) => warn!(
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                "Recovered stalled jobs"
            ),
            Err(e) => warn!(error = %e, "Stall sweep failed"),
        }
    }

    /// Runs one leased job to its terminal transition. Returns whether a
    /// shutdown was requested meanwhile.
    async fn process(
        &self,
        lease: Lease,
        shutdown: &mut watch::Receiver<bool>,
        stats: &mut WorkerStats,
    ) -> bool {
        let span = info_span!(
            "job",
            job_id = %lease.job.id,
            token_id = %lease.job.payload.token_id,
            device_id = %self.settings.device_id,
        );
        self.process_inner(lease, shutdown, stats)
            .instrument(span)
            .await
    }

    async fn process_inner(
        &self,
        lease: Lease,
        shutdown: &mut watch::Receiver<bool>,
        stats: &mut WorkerStats,
    ) -> bool {
        let queue_name = self.queue.name().to_string();
        let payload = &lease.job.payload;
        let threshold = payload.threshold_or(self.settings.default_min_leading_bs);
        let deadline = self.settings.effective_deadline(lease.job.timeout_ms);

        JobMetrics::job_leased(&queue_name, &self.settings.device_id);
        info!(
            deployer_address = %payload.deployer_address,
            init_code_hash = %payload.init_code_hash,
            threshold,
            attempts = lease.job.attempts,
            deadline_ms = deadline.as_millis() as u64,
            "Job started"
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let run = self.controller.run(payload, threshold, deadline, cancel_rx);
        tokio::pin!(run);

        let mut keeper = LeaseKeeper::spawn(
            self.queue.clone(),
            lease.clone(),
            self.settings.lease_renew_interval,
        );
        let mut watching_lease = true;
        let mut lease_lost = false;
        let mut stopping = false;

        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                lost = &mut keeper.lost, if watching_lease => {
                    watching_lease = false;
                    if let Ok(e) = lost {
                        warn!(error = %e, "Lease lost, stopping miner");
                        lease_lost = true;
                        cancel_tx.send_replace(true);
                    }
                }
                changed = shutdown.changed(), if !stopping => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        info!("Shutdown requested, stopping miner");
                        stopping = true;
                        cancel_tx.send_replace(true);
                    }
                }
            }
        };

        if lease_lost {
            warn!(outcome = outcome.label(), "Lease lost, leaving job to the broker");
            return stopping;
        }

        // The keeper keeps renewing while the outcome is recorded
        let transition = Transition::from(outcome);
        match self.settle(&lease, &transition).await {
            Ok(()) => match transition {
                Transition::Ack(result) => {
                    stats.completed += 1;
                    JobMetrics::job_completed(&queue_name);
                    info!(
                        salt = %result.salt,
                        vanity_address = %result.vanity_address,
                        "Job completed"
                    );
                }
                Transition::Nack(failure) => {
                    stats.failed += 1;
                    JobMetrics::job_failed(&queue_name, failure.reason.as_str());
                    warn!(reason = %failure.reason, message = %failure.message, "Job failed");
                }
                Transition::Release => {
                    stats.released += 1;
                    JobMetrics::job_released(&queue_name);
                    info!("Job released back to the queue");
                }
            },
            Err(e) if e.is_lease_lost() => {
                warn!(
                    transition = transition.label(),
                    "Lease lost before the outcome was recorded, leaving job to the broker"
                );
            }
            Err(e) => {
                error!(
                    transition = transition.label(),
                    error = %e,
                    "Failed to record job outcome, leaving job to the stall sweep"
                );
            }
        }
        drop(keeper);

        stopping
    }

    /// Applies `transition`, retrying broker errors under the settle policy.
    async fn settle(&self, lease: &Lease, transition: &Transition) -> JobResult<()> {
        let policy = &self.settings.settle_retry;
        let mut retry = 0;
        loop {
            let applied = match transition {
                Transition::Ack(result) => self.queue.ack(lease, result.clone()).await,
                Transition::Nack(failure) => self.queue.nack(lease, failure.clone()).await,
                Transition::Release => self.queue.release(lease).await,
            };
            match applied {
                Err(e) if e.is_transient() && policy.should_retry(retry + 1) => {
                    retry += 1;
                    let delay = policy.delay_for_attempt(retry);
                    warn!(
                        transition = transition.label(),
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Queue transition failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

/// Queue transition for a finished run.
#[derive(Debug)]
enum Transition {
    Ack(MiningResult),
    Nack(JobFailure),
    Release,
}

impl Transition {
    fn label(&self) -> &'static str {
        match self {
            Transition::Ack(_) => "ack",
            Transition::Nack(_) => "nack",
            Transition::Release => "release",
        }
    }
}

impl From<ExecutionOutcome> for Transition {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Found(result) => Transition::Ack(result),
            ExecutionOutcome::Failed(failure) => Transition::Nack(failure),
            ExecutionOutcome::Cancelled => Transition::Release,
        }
    }
}

/// Renews a lease on its own task until dropped.
///
/// Renewal never blocks the supervision loop; a revoked lease is reported
/// once through `lost`.
struct LeaseKeeper {
    handle: JoinHandle<()>,
    lost: oneshot::Receiver<JobError>,
}

impl LeaseKeeper {
    fn spawn(queue: Arc<dyn JobQueue>, lease: Lease, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let (lost_tx, lost) = oneshot::channel();

        let task = async move {
            let queue_name = queue.name().to_string();
            let mut renew = tokio::time::interval_at(Instant::now() + period, period);
            renew.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                renew.tick().await;
                match queue.renew(&lease).await {
                    Ok(()) => debug!("Lease renewed"),
                    Err(e) if e.is_lease_lost() => {
                        JobMetrics::lease_renewal_failed(&queue_name);
                        let _ = lost_tx.send(e);
                        return;
                    }
                    Err(e) => {
                        JobMetrics::lease_renewal_failed(&queue_name);
                        warn!(error = %e, "Lease renewal failed, retrying");
                    }
                }
            }
        };

        Self {
            handle: tokio::spawn(task.in_current_span()),
            lost,
        }
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Sleeps for `period`. Returns true when shutdown was requested meanwhile.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, period: Duration) -> bool {
    tokio::select! {
        () = tokio::time::sleep(period) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow_and_update(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vanity_config::QueueConfig;
    use vanity_core::MiningPayload;
    use vanity_jobs::{EnqueueOptions, InMemoryJobQueue};

    fn payload() -> MiningPayload {
        MiningPayload::new(
            "0x000000000000000000000000000000000000dEaD",
            format!("0x{}", "11".repeat(32)),
            "t1",
        )
    }

    fn result() -> MiningResult {
        MiningResult {
            salt: format!("0x{}", "ab".repeat(32)),
            vanity_address: format!("0x{}", "bb".repeat(20)),
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings::from_config(&AppConfig::default())
    }

    #[test]
    fn test_effective_deadline_uses_worker_budget() {
        let settings = settings();
        assert_eq!(
            settings.effective_deadline(300_000),
            Duration::from_millis(295_000)
        );
        assert_eq!(
            settings.effective_deadline(3_600_000),
            Duration::from_millis(295_000)
        );
    }

    #[test]
    fn test_effective_deadline_respects_job_timeout() {
        let settings = settings();
        assert_eq!(
            settings.effective_deadline(60_000),
            Duration::from_millis(55_000)
        );
        assert_eq!(settings.effective_deadline(1_000), Duration::from_millis(1));
    }

    #[test]
    fn test_worker_id_carries_device() {
        let settings = settings();
        assert!(settings.worker_id.starts_with("0-"));
        assert_ne!(settings.worker_id, WorkerSettings::from_config(&AppConfig::default()).worker_id);
    }

    #[test]
    fn test_settle_retry_from_config() {
        let policy = settings().settle_retry;
        assert!(policy.should_retry(5));
        assert!(!policy.should_retry(6));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_transition_from_outcome() {
        assert_eq!(Transition::from(ExecutionOutcome::Cancelled).label(), "release");
        let failure = JobFailure::new(vanity_core::FailureReason::Timeout, "deadline");
        assert_eq!(Transition::from(ExecutionOutcome::Failed(failure)).label(), "nack");
    }

    #[tokio::test]
    async fn test_lease_keeper_reports_revoked_lease() {
        let queue = Arc::new(InMemoryJobQueue::new(QueueConfig::default()));
        queue
            .enqueue(payload(), EnqueueOptions::default())
            .await
            .unwrap();
        let lease = queue.lease("w1").await.unwrap().expect("job leased");
        queue.release(&lease).await.unwrap();

        let mut keeper = LeaseKeeper::spawn(queue.clone(), lease, Duration::from_millis(10));
        let lost = tokio::time::timeout(Duration::from_secs(5), &mut keeper.lost)
            .await
            .expect("keeper never reported")
            .expect("keeper dropped its sender");
        assert!(lost.is_lease_lost());
    }

    #[tokio::test]
    async fn test_lease_keeper_extends_lease() {
        let queue = Arc::new(InMemoryJobQueue::new(QueueConfig {
            lease_duration_ms: 100,
            lease_renew_interval_ms: 20,
            ..QueueConfig::default()
        }));
        queue
            .enqueue(payload(), EnqueueOptions::default())
            .await
            .unwrap();
        let lease = queue.lease("w1").await.unwrap().expect("job leased");

        let keeper = LeaseKeeper::spawn(queue.clone(), lease.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(queue.recover_stalled().await.unwrap().is_empty());

        drop(keeper);
        queue.ack(&lease, result()).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_or_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        assert!(!wait_or_shutdown(&mut rx, Duration::from_millis(5)).await);

        tx.send_replace(true);
        assert!(wait_or_shutdown(&mut rx, Duration::from_secs(5)).await);

        drop(tx);
        assert!(wait_or_shutdown(&mut rx, Duration::from_secs(5)).await);
    }
}
