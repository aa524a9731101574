//! Vanity Jobs - Mining Job Queue
//!
//! A durable job queue for vanity salt searches with:
//! - Validated mining payloads stored as typed job records
//! - Exclusive, renewable leases (one worker per job at a time)
//! - Stall recovery with a bounded redelivery count
//! - Priority ordering, FIFO within a priority
//! - Bounded retention of completed and failed jobs
//!
//! # Architecture
//!
//! ```text
//!  Producer ──enqueue──▶ waiting ──lease──▶ active ──ack──▶ completed
//!                           ▲                 │  └──nack──▶ failed
//!                           │                 │
//!                           └──release/stall──┘ (stall past the limit ──▶ failed)
//! ```
//!
//! Two adapters implement [`JobQueue`]: [`RedisJobQueue`] for deployments and
//! [`InMemoryJobQueue`] for tests and single-host runs.

pub mod error;
pub mod job;
pub mod memory;
pub mod metrics;
pub mod queue;
pub mod redis;
pub mod retry;

pub use error::{JobError, JobResult};
pub use job::{JobId, JobRecord, JobState, Lease, StallDisposition};
pub use memory::InMemoryJobQueue;
pub use crate::metrics::{register_metrics, JobMetrics, ProcessMetrics};
pub use crate::redis::{create_pool, RedisJobQueue, RedisKeys};
pub use queue::{EnqueueOptions, JobQueue, Priority, QueueStats, StallReport};
pub use retry::{RetryPolicy, RetryStrategy};

/// Re-export commonly used traits
pub mod prelude {
    pub use crate::job::{JobId, JobRecord, JobState, Lease};
    pub use crate::queue::{EnqueueOptions, JobQueue, Priority};
    pub use crate::{JobError, JobResult};
}
