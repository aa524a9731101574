//! Job queue abstraction.

use crate::error::JobResult;
use crate::job::{JobId, JobRecord, Lease};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use vanity_config::{QueueConfig, RetentionConfig};
use vanity_core::{JobFailure, MiningPayload, MiningResult, ValidateExt};

/// Job priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i8)]
pub enum Priority {
    /// Low priority.
    Low = -10,
    /// Normal priority (default).
    Normal = 0,
    /// High priority.
    High = 10,
    /// Critical priority.
    Critical = 20,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

impl From<i8> for Priority {
    fn from(value: i8) -> Self {
        match value {
            v if v >= 20 => Priority::Critical,
            v if v >= 10 => Priority::High,
            v if v <= -10 => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

impl From<Priority> for i8 {
    fn from(priority: Priority) -> Self {
        priority as i8
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(name)
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Options for enqueuing a job.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Broker-level processing timeout; the queue default applies when unset.
    pub timeout_ms: Option<u64>,
    /// Priority.
    pub priority: Priority,
    /// Terminal retention override.
    pub retention: Option<RetentionConfig>,
}

impl EnqueueOptions {
    /// Set the processing timeout.
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Override terminal retention.
    pub fn retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = Some(retention);
        self
    }
}

/// Validates a payload and builds the waiting record for it.
pub(crate) fn prepare_job(
    config: &QueueConfig,
    payload: MiningPayload,
    options: EnqueueOptions,
) -> JobResult<JobRecord> {
    payload.validate_request()?;

    let timeout_ms = options.timeout_ms.unwrap_or(config.job_timeout_ms);
    let mut record = JobRecord::new(&config.name, payload, options.priority.into(), timeout_ms);
    record.retention = options.retention;
    Ok(record)
}

/// Result of a stall sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StallReport {
    /// Jobs returned to the waiting set.
    pub requeued: Vec<JobId>,
    /// Jobs failed with `stalled-exhausted`.
    pub failed: Vec<JobId>,
}

impl StallReport {
    /// Returns true if no lease had expired.
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Queue name.
    pub queue: String,

    /// Waiting jobs count.
    pub waiting: u64,

    /// Active (leased) jobs count.
    pub active: u64,

    /// Retained completed jobs count.
    pub completed: u64,

    /// Retained failed jobs count.
    pub failed: u64,
}

/// Job queue trait for different backends.
///
/// Every operation on a leased job takes the [`Lease`] so a worker whose
/// lease was revoked can never resolve a job it no longer owns.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Queue name.
    fn name(&self) -> &str;

    /// Validate and persist a job.
    async fn enqueue(&self, payload: MiningPayload, options: EnqueueOptions) -> JobResult<JobId>;

    /// Lease the next waiting job, highest priority first, FIFO within a priority.
    async fn lease(&self, worker_id: &str) -> JobResult<Option<Lease>>;

    /// Extend the lease's visibility window.
    async fn renew(&self, lease: &Lease) -> JobResult<()>;

    /// Complete a leased job.
    async fn ack(&self, lease: &Lease, result: MiningResult) -> JobResult<()>;

    /// Fail a leased job.
    async fn nack(&self, lease: &Lease, failure: JobFailure) -> JobResult<()>;

    /// Return a leased job to the waiting set without counting a stall.
    async fn release(&self, lease: &Lease) -> JobResult<()>;

    /// Revoke expired leases.
    async fn recover_stalled(&self) -> JobResult<StallReport>;

    /// Get a job by ID.
    async fn get_job(&self, job_id: &JobId) -> JobResult<Option<JobRecord>>;

    /// Get queue counts.
    async fn stats(&self) -> JobResult<QueueStats>;

    /// Health check.
    async fn health_check(&self) -> JobResult<()>;

    /// Close the broker connection.
    async fn close(&self) -> JobResult<()>;
}
