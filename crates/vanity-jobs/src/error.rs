//! Job queue error types.

use thiserror::Error;
use vanity_core::VanityError;

/// Result type for job queue operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job queue errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Redis pool error.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Invalid job state.
    #[error("Invalid job state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The lease was revoked or already resolved.
    #[error("Lease lost for job {0}")]
    LeaseLost(String),

    /// Payload rejected before it was persisted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Queue was closed.
    #[error("Queue is closed")]
    Closed,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Returns true if the broker may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::Redis(_) | JobError::Pool(_))
    }

    /// Returns true if the caller no longer owns the job.
    pub fn is_lease_lost(&self) -> bool {
        matches!(self, JobError::LeaseLost(_))
    }
}

impl From<VanityError> for JobError {
    fn from(err: VanityError) -> Self {
        match err {
            VanityError::Validation(msg) => JobError::Validation(msg),
            VanityError::Configuration(msg) => JobError::Configuration(msg),
            VanityError::NotFound { id, .. } => JobError::NotFound(id),
            other => JobError::Internal(other.to_string()),
        }
    }
}

impl From<JobError> for VanityError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => VanityError::not_found("job", id),
            JobError::Validation(msg) => VanityError::Validation(msg),
            JobError::Configuration(msg) => VanityError::Configuration(msg),
            e @ (JobError::Redis(_) | JobError::Pool(_) | JobError::Closed) => {
                VanityError::Broker(e.to_string())
            }
            other => VanityError::Internal(other.to_string()),
        }
    }
}
