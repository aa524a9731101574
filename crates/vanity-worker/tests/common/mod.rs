//! Common test infrastructure for worker integration tests.
//!
//! Stand-in miners are shell scripts. They receive the device id as `$4`,
//! so tests pass a temporary directory there and the scripts leave marker
//! files in it.

use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use vanity_config::QueueConfig;
use vanity_core::{JobFailure, MiningPayload, MiningResult};
use vanity_jobs::{
    EnqueueOptions, InMemoryJobQueue, JobError, JobId, JobQueue, JobRecord, JobResult, Lease,
    QueueStats, RetryPolicy, StallReport,
};
use vanity_worker::{ControllerConfig, ProcessController, Worker, WorkerSettings, WorkerStats};

pub fn salt() -> String {
    format!("0x{}", "ab".repeat(32))
}

pub fn vanity_address() -> String {
    format!("0x{}", "bb".repeat(20))
}

pub fn expected_result() -> MiningResult {
    MiningResult {
        salt: salt(),
        vanity_address: vanity_address(),
    }
}

pub fn payload() -> MiningPayload {
    MiningPayload::new(
        "0x000000000000000000000000000000000000dEaD",
        format!("0x{}", "11".repeat(32)),
        "t1",
    )
}

fn marker() -> String {
    format!("SALT: {} ADDRESS: {}", salt(), vanity_address())
}

/// Script bodies, keyed by file name.
fn script_bodies() -> Vec<(&'static str, String)> {
    let marker = marker();
    let (head, tail) = marker.split_at(40);
    vec![
        (
            "found.sh",
            format!(
                "printf '%s\\n' \"$@\" > \"$4/args\"\n\
                 echo \"$MIN_LEADING_BS\" > \"$4/threshold\"\n\
                 echo 'searching' >&2\n\
                 echo '{marker}'\n\
                 exit 0\n"
            ),
        ),
        (
            "split.sh",
            format!("printf 'progress {head}'\nsleep 0.2\nprintf '{tail}\\n'\nexit 0\n"),
        ),
        ("no_result.sh", "echo 'nothing found'\nexit 0\n".to_string()),
        ("crash.sh", "echo 'device lost' >&2\nexit 3\n".to_string()),
        (
            "hang.sh",
            "trap 'touch \"$4/interrupted\"; exit 130' INT\n\
             touch \"$4/started\"\n\
             while :; do sleep 0.05; done\n"
                .to_string(),
        ),
        (
            "stubborn.sh",
            "trap '' INT\ntouch \"$4/started\"\nwhile :; do sleep 0.05; done\n".to_string(),
        ),
        (
            "found_then_hang.sh",
            format!(
                "trap 'exit 130' INT\n\
                 echo '{marker}'\n\
                 while :; do sleep 0.05; done\n"
            ),
        ),
        (
            "found_no_newline_then_hang.sh",
            format!(
                "trap 'exit 130' INT\n\
                 printf '{marker}'\n\
                 while :; do sleep 0.05; done\n"
            ),
        ),
        (
            "exclusive.sh",
            format!(
                "if ! mkdir \"$4/lock\" 2>/dev/null; then touch \"$4/overlap\"; fi\n\
                 sleep 0.2\n\
                 rmdir \"$4/lock\"\n\
                 echo '{marker}'\n"
            ),
        ),
    ]
}

/// All scripts are written once, before any test spawns a process, so no
/// child inherits a script that is still open for writing.
static SCRIPTS: LazyLock<TempDir> = LazyLock::new(|| {
    let dir = TempDir::new().expect("Failed to create script dir");
    for (name, body) in script_bodies() {
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).expect("Failed to write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod script");
    }
    dir
});

/// Path of a stand-in miner.
pub fn script(name: &str) -> PathBuf {
    SCRIPTS.path().join(name)
}

/// Worker harness over an in-memory queue.
pub struct TestWorker {
    pub queue: Arc<InMemoryJobQueue>,
    pub device_dir: TempDir,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl TestWorker {
    /// Queue and worker with a 30 s deadline.
    pub fn new(miner: PathBuf) -> Self {
        Self::with_timing(miner, Duration::from_secs(30), Duration::from_secs(5))
    }

    pub fn with_timing(miner: PathBuf, deadline: Duration, grace: Duration) -> Self {
        Self::with_queue(miner, deadline, grace, |queue| queue as Arc<dyn JobQueue>)
    }

    /// Runs the worker against the queue returned by `wrap`.
    pub fn with_queue<F>(miner: PathBuf, deadline: Duration, grace: Duration, wrap: F) -> Self
    where
        F: FnOnce(Arc<InMemoryJobQueue>) -> Arc<dyn JobQueue>,
    {
        let queue = Arc::new(InMemoryJobQueue::new(QueueConfig::default()));
        let device_dir = TempDir::new().expect("Failed to create device dir");
        let device_id = device_dir.path().display().to_string();

        let controller = ProcessController::new(ControllerConfig {
            miner_path: miner,
            device_id: device_id.clone(),
            interrupt_grace: grace,
            flush_timeout: Duration::from_millis(500),
        });
        let settings = WorkerSettings {
            worker_id: "test-worker".to_string(),
            device_id,
            deadline,
            deadline_safety_margin: Duration::from_secs(5),
            default_min_leading_bs: 8,
            poll_interval: Duration::from_millis(20),
            lease_renew_interval: Duration::from_millis(100),
            stall_check_interval: Duration::from_secs(1),
            settle_retry: RetryPolicy::fixed(3, Duration::from_millis(20)),
        };

        let worker = Worker::new(wrap(queue.clone()), controller, settings);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            worker
                .run(shutdown_rx)
                .await
                .expect("Worker run failed")
        });

        Self {
            queue,
            device_dir,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn device_path(&self, name: &str) -> PathBuf {
        self.device_dir.path().join(name)
    }

    pub async fn enqueue(&self, payload: MiningPayload) -> JobId {
        self.queue
            .enqueue(payload, Default::default())
            .await
            .expect("Failed to enqueue")
    }

    /// Waits until the job reaches a terminal state.
    pub async fn wait_terminal(&self, job_id: &JobId) -> JobRecord {
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            let record = self
                .queue
                .get_job(job_id)
                .await
                .expect("Failed to get job")
                .expect("Job not found");
            if record.state.is_terminal() {
                return record;
            }
            assert!(
                Instant::now() < deadline,
                "job {} still {}",
                job_id,
                record.state
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Signals shutdown and returns the worker's counters.
    pub async fn stop(&mut self) -> WorkerStats {
        self.shutdown.send_replace(true);
        let handle = self.handle.take().expect("Worker already stopped");
        tokio::time::timeout(Duration::from_secs(20), handle)
            .await
            .expect("Worker did not stop")
            .expect("Worker task panicked")
    }
}

/// Waits until `path` exists.
pub async fn wait_for_file(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !path.exists() {
        assert!(Instant::now() < deadline, "{} never appeared", path.display());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Queue whose first `ack_failures` acks fail with a connection error.
pub struct FlakyAckQueue {
    inner: Arc<InMemoryJobQueue>,
    ack_failures: AtomicU32,
}

impl FlakyAckQueue {
    pub fn new(inner: Arc<InMemoryJobQueue>, ack_failures: u32) -> Self {
        Self {
            inner,
            ack_failures: AtomicU32::new(ack_failures),
        }
    }
}

#[async_trait]
impl JobQueue for FlakyAckQueue {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn enqueue(&self, payload: MiningPayload, options: EnqueueOptions) -> JobResult<JobId> {
        self.inner.enqueue(payload, options).await
    }

    async fn lease(&self, worker_id: &str) -> JobResult<Option<Lease>> {
        self.inner.lease(worker_id).await
    }

    async fn renew(&self, lease: &Lease) -> JobResult<()> {
        self.inner.renew(lease).await
    }

    async fn ack(&self, lease: &Lease, result: MiningResult) -> JobResult<()> {
        let failing = self
            .ack_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
            return Err(JobError::Redis(reset.into()));
        }
        self.inner.ack(lease, result).await
    }

    async fn nack(&self, lease: &Lease, failure: JobFailure) -> JobResult<()> {
        self.inner.nack(lease, failure).await
    }

    async fn release(&self, lease: &Lease) -> JobResult<()> {
        self.inner.release(lease).await
    }

    async fn recover_stalled(&self) -> JobResult<StallReport> {
        self.inner.recover_stalled().await
    }

    async fn get_job(&self, job_id: &JobId) -> JobResult<Option<JobRecord>> {
        self.inner.get_job(job_id).await
    }

    async fn stats(&self) -> JobResult<QueueStats> {
        self.inner.stats().await
    }

    async fn health_check(&self) -> JobResult<()> {
        self.inner.health_check().await
    }

    async fn close(&self) -> JobResult<()> {
        self.inner.close().await
    }
}
