//! Job record, state machine and leases.

use crate::error::{JobError, JobResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use vanity_config::RetentionConfig;
use vanity_core::{FailureReason, JobFailure, MiningPayload, MiningResult};

/// Unique job identifier.
///
/// Generated ids are UUIDv7, so they sort by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a new time-ordered job ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Creates a job ID from a string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be leased.
    Waiting,
    /// Leased by exactly one worker.
    Active,
    /// Finished with a result.
    Completed,
    /// Finished with a failure.
    Failed,
    /// Lease expired without a resolution.
    Stalled,
}

impl JobState {
    /// Returns true for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Stalled => "stalled",
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        JobState::Waiting
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to a job whose lease expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallDisposition {
    /// Returned to the waiting set.
    Requeued,
    /// Failed with `stalled-exhausted`.
    Exhausted,
}

/// A mining job as persisted by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job ID.
    pub id: JobId,

    /// Queue name.
    pub queue: String,

    /// Search parameters.
    pub payload: MiningPayload,

    /// Current state.
    pub state: JobState,

    /// Stall redeliveries so far.
    pub attempts: u32,

    /// Priority (higher = more urgent).
    pub priority: i8,

    /// Broker-level processing timeout in milliseconds.
    pub timeout_ms: u64,

    /// Retention override for this job's terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<RetentionConfig>,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// When the current (or last) lease started.
    pub started_at: Option<DateTime<Utc>>,

    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,

    /// Worker holding (or last holding) the lease.
    pub worker_id: Option<String>,

    /// Result, only when completed.
    pub result: Option<MiningResult>,

    /// Failure, only when failed.
    pub failure: Option<JobFailure>,
}

impl JobRecord {
    /// Creates a waiting job.
    pub fn new(queue: impl Into<String>, payload: MiningPayload, priority: i8, timeout_ms: u64) -> Self {
        Self {
            id: JobId::new(),
            queue: queue.into(),
            payload,
            state: JobState::Waiting,
            attempts: 0,
            priority,
            timeout_ms,
            retention: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            worker_id: None,
            result: None,
            failure: None,
        }
    }

    fn expect_state(&self, expected: &[JobState]) -> JobResult<()> {
        if expected.contains(&self.state) {
            return Ok(());
        }
        Err(JobError::InvalidState {
            expected: expected
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("|"),
            actual: self.state.to_string(),
        })
    }

    /// Waiting → Active.
    pub fn activate(&mut self, worker_id: &str) -> JobResult<()> {
        self.expect_state(&[JobState::Waiting])?;
        self.state = JobState::Active;
        self.started_at = Some(Utc::now());
        self.worker_id = Some(worker_id.to_string());
        Ok(())
    }

    /// Active → Completed.
    pub fn complete(&mut self, result: MiningResult) -> JobResult<()> {
        self.expect_state(&[JobState::Active])?;
        self.state = JobState::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
        Ok(())
    }

    /// Active or Stalled → Failed.
    pub fn fail(&mut self, failure: JobFailure) -> JobResult<()> {
        self.expect_state(&[JobState::Active, JobState::Stalled])?;
        self.state = JobState::Failed;
        self.finished_at = Some(Utc::now());
        self.failure = Some(failure);
        Ok(())
    }

    /// Active → Stalled.
    ///
    /// A Waiting record is accepted too: it belongs to a lease whose
    /// activation was never written.
    pub fn mark_stalled(&mut self) -> JobResult<()> {
        self.expect_state(&[JobState::Active, JobState::Waiting])?;
        self.state = JobState::Stalled;
        Ok(())
    }

    /// Stalled → Waiting, counting the redelivery.
    pub fn requeue(&mut self) -> JobResult<()> {
        self.expect_state(&[JobState::Stalled])?;
        self.state = JobState::Waiting;
        self.attempts += 1;
        self.started_at = None;
        self.worker_id = None;
        Ok(())
    }

    /// Active → Waiting without counting a stall.
    pub fn release(&mut self) -> JobResult<()> {
        self.expect_state(&[JobState::Active])?;
        self.state = JobState::Waiting;
        self.started_at = None;
        self.worker_id = None;
        Ok(())
    }

    /// Handles an expired lease.
    ///
    /// The job is requeued while the redelivery count stays within
    /// `max_stalled_count`; past that it fails with `stalled-exhausted`.
    pub fn stall(&mut self, max_stalled_count: u32) -> JobResult<StallDisposition> {
        self.mark_stalled()?;
        if self.attempts + 1 > max_stalled_count {
            self.fail(JobFailure::new(
                FailureReason::StalledExhausted,
                format!("lease expired {} time(s)", self.attempts + 1),
            ))?;
            Ok(StallDisposition::Exhausted)
        } else {
            self.requeue()?;
            Ok(StallDisposition::Requeued)
        }
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> JobResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> JobResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A time-bounded right to process one job exclusively.
#[derive(Debug, Clone)]
pub struct Lease {
    /// Snapshot of the job when it was leased.
    pub job: JobRecord,

    /// Token identifying this lease; a later lease of the same job differs.
    pub token: String,

    /// When the visibility window closes unless renewed.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Creates a lease with a fresh token.
    pub fn new(job: JobRecord, expires_at: DateTime<Utc>) -> Self {
        Self::with_token(job, Self::new_token(), expires_at)
    }

    /// Creates a lease under a token issued beforehand.
    pub fn with_token(job: JobRecord, token: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            job,
            token,
            expires_at,
        }
    }

    /// Generates a lease token.
    pub fn new_token() -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Returns the leased job's id.
    pub fn job_id(&self) -> &JobId {
        &self.job.id
    }
}
