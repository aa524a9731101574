//! In-process job queue.
//!
//! Implements the same contract as the Redis adapter on top of a mutex-guarded
//! state. Used by tests and single-host runs.

use crate::error::{JobError, JobResult};
use crate::job::{JobId, JobRecord, JobState, Lease, StallDisposition};
use crate::metrics::JobMetrics;
use crate::queue::{prepare_job, EnqueueOptions, JobQueue, Priority, QueueStats, StallReport};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, warn};
use vanity_config::QueueConfig;
use vanity_core::{JobFailure, MiningPayload, MiningResult};

/// Waiting-set key: higher priority first, then enqueue order.
type WaitKey = (Reverse<i8>, u64);

struct ActiveLease {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<JobId, JobRecord>,
    order: HashMap<JobId, u64>,
    waiting: BTreeMap<WaitKey, JobId>,
    active: HashMap<JobId, ActiveLease>,
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
    next_seq: u64,
    closed: bool,
}

impl MemoryState {
    fn ensure_open(&self) -> JobResult<()> {
        if self.closed {
            return Err(JobError::Closed);
        }
        Ok(())
    }

    fn push_waiting(&mut self, job_id: &JobId, priority: i8) {
        let seq = self.order.get(job_id).copied().unwrap_or_else(|| {
            self.next_seq += 1;
            self.next_seq
        });
        self.order.insert(job_id.clone(), seq);
        self.waiting.insert((Reverse(priority), seq), job_id.clone());
    }

    /// Removes the active entry if `lease` still owns it.
    fn take_lease(&mut self, lease: &Lease) -> JobResult<()> {
        match self.active.get(lease.job_id()) {
            Some(active) if active.token == lease.token => {
                self.active.remove(lease.job_id());
                Ok(())
            }
            _ => Err(JobError::LeaseLost(lease.job_id().to_string())),
        }
    }

    fn record_mut(&mut self, job_id: &JobId) -> JobResult<&mut JobRecord> {
        self.jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Files a job under its terminal set and evicts what retention no longer allows.
    fn retain_terminal(&mut self, job_id: &JobId, default_retention: vanity_config::RetentionConfig) {
        let Some(record) = self.jobs.get(job_id) else {
            return;
        };
        let retention = record.retention.unwrap_or(default_retention);
        let (bound, set) = match record.state {
            JobState::Completed => (retention.completed, &mut self.completed),
            JobState::Failed => (retention.failed, &mut self.failed),
            _ => return,
        };
        set.push_back(job_id.clone());

        let mut evicted = Vec::new();
        while set.len() > bound.count {
            if let Some(old) = set.pop_front() {
                evicted.push(old);
            }
        }
        if let Some(max_age) = bound.max_age() {
            let cutoff = Utc::now() - ChronoDuration::from_std(max_age).unwrap_or_default();
            while let Some(front) = set.front() {
                let expired = self
                    .jobs
                    .get(front)
                    .and_then(|job| job.finished_at)
                    .map_or(true, |finished| finished < cutoff);
                if !expired {
                    break;
                }
                if let Some(old) = set.pop_front() {
                    evicted.push(old);
                }
            }
        }

        for old in evicted {
            self.jobs.remove(&old);
            self.order.remove(&old);
        }
    }
}

/// In-memory job queue.
pub struct InMemoryJobQueue {
    config: QueueConfig,
    state: Mutex<MemoryState>,
}

impl InMemoryJobQueue {
    /// Create a new in-memory queue.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lease_expiry(&self) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::from_std(self.config.lease_duration()).unwrap_or_default()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn enqueue(&self, payload: MiningPayload, options: EnqueueOptions) -> JobResult<JobId> {
        let record = prepare_job(&self.config, payload, options)?;
        let job_id = record.id.clone();

        let mut state = self.state.lock();
        state.ensure_open()?;
        state.push_waiting(&job_id, record.priority);
        state.jobs.insert(job_id.clone(), record.clone());
        drop(state);

        let priority = Priority::from(record.priority);
        JobMetrics::job_enqueued(&self.config.name, &priority.to_string());
        debug!(
            job_id = %job_id,
            token_id = %record.payload.token_id,
            priority = %priority,
            "Enqueued job"
        );

        Ok(job_id)
    }

    async fn lease(&self, worker_id: &str) -> JobResult<Option<Lease>> {
        let expires_at = self.lease_expiry();
        let mut state = self.state.lock();
        state.ensure_open()?;

        let Some((_, job_id)) = state.waiting.pop_first() else {
            return Ok(None);
        };

        let record = state.record_mut(&job_id)?;
        record.activate(worker_id)?;
        let lease = Lease::new(record.clone(), expires_at);

        state.active.insert(
            job_id.clone(),
            ActiveLease {
                token: lease.token.clone(),
                expires_at,
            },
        );

        debug!(job_id = %job_id, worker_id = %worker_id, "Leased job");
        Ok(Some(lease))
    }

    async fn renew(&self, lease: &Lease) -> JobResult<()> {
        let expires_at = self.lease_expiry();
        let mut state = self.state.lock();
        state.ensure_open()?;

        match state.active.get_mut(lease.job_id()) {
            Some(active) if active.token == lease.token => {
                active.expires_at = expires_at;
                Ok(())
            }
            _ => Err(JobError::LeaseLost(lease.job_id().to_string())),
        }
    }

    async fn ack(&self, lease: &Lease, result: MiningResult) -> JobResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.take_lease(lease)?;
        state.record_mut(lease.job_id())?.complete(result)?;
        state.retain_terminal(lease.job_id(), self.config.retention);

        debug!(job_id = %lease.job_id(), "Completed job");
        Ok(())
    }

    async fn nack(&self, lease: &Lease, failure: JobFailure) -> JobResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.take_lease(lease)?;
        state.record_mut(lease.job_id())?.fail(failure)?;
        state.retain_terminal(lease.job_id(), self.config.retention);

        debug!(job_id = %lease.job_id(), "Failed job");
        Ok(())
    }

    async fn release(&self, lease: &Lease) -> JobResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.take_lease(lease)?;
        let record = state.record_mut(lease.job_id())?;
        record.release()?;
        let priority = record.priority;
        state.push_waiting(lease.job_id(), priority);

        debug!(job_id = %lease.job_id(), "Released job");
        Ok(())
    }

    async fn recover_stalled(&self) -> JobResult<StallReport> {
        let now = Utc::now();
        let mut state = self.state.lock();
        state.ensure_open()?;

        let expired: Vec<JobId> = state
            .active
            .iter()
            .filter(|(_, active)| active.expires_at <= now)
            .map(|(job_id, _)| job_id.clone())
            .collect();

        let mut report = StallReport::default();
        for job_id in expired {
            state.active.remove(&job_id);
            let record = state.record_mut(&job_id)?;
            let disposition = record.stall(self.config.max_stalled_count)?;
            let (priority, attempts) = (record.priority, record.attempts);

            match disposition {
                StallDisposition::Requeued => {
                    state.push_waiting(&job_id, priority);
                    JobMetrics::job_stalled(&self.config.name, "requeued");
                    warn!(job_id = %job_id, attempts, "Requeued stalled job");
                    report.requeued.push(job_id);
                }
                StallDisposition::Exhausted => {
                    state.retain_terminal(&job_id, self.config.retention);
                    JobMetrics::job_stalled(&self.config.name, "exhausted");
                    warn!(job_id = %job_id, attempts, "Stalled job exhausted its redeliveries");
                    report.failed.push(job_id);
                }
            }
        }

        Ok(report)
    }

    async fn get_job(&self, job_id: &JobId) -> JobResult<Option<JobRecord>> {
        Ok(self.state.lock().jobs.get(job_id).cloned())
    }

    async fn stats(&self) -> JobResult<QueueStats> {
        let state = self.state.lock();
        Ok(QueueStats {
            queue: self.config.name.clone(),
            waiting: state.waiting.len() as u64,
            active: state.active.len() as u64,
            completed: state.completed.len() as u64,
            failed: state.failed.len() as u64,
        })
    }

    async fn health_check(&self) -> JobResult<()> {
        self.state.lock().ensure_open()
    }

    async fn close(&self) -> JobResult<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};
    use vanity_config::{RetentionConfig, TerminalRetention};
    use vanity_core::FailureReason;

    fn payload(token_id: &str) -> MiningPayload {
        MiningPayload::new(
            "0x000000000000000000000000000000000000dEaD",
            format!("0x{}", "11".repeat(32)),
            token_id,
        )
    }

    fn result() -> MiningResult {
        MiningResult {
            salt: format!("0x{}", "ab".repeat(32)),
            vanity_address: format!("0x{}", "bb".repeat(20)),
        }
    }

    fn queue_with(lease_ms: u64) -> InMemoryJobQueue {
        InMemoryJobQueue::new(QueueConfig {
            lease_duration_ms: lease_ms,
            lease_renew_interval_ms: lease_ms / 2,
            ..QueueConfig::default()
        })
    }

    #[tokio::test]
    async fn test_enqueue_lease_ack() {
        let queue = queue_with(30_000);
        let id = queue.enqueue(payload("t1"), EnqueueOptions::default()).await.unwrap();

        let lease = queue.lease("w1").await.unwrap().expect("job leased");
        assert_eq!(lease.job_id(), &id);
        assert_eq!(lease.job.state, JobState::Active);
        assert!(queue.lease("w2").await.unwrap().is_none());

        assert_ok!(queue.ack(&lease, result()).await);
        let job = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.result, Some(result()));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_payload() {
        let queue = queue_with(30_000);
        let mut bad = payload("t1");
        bad.deployer_address = "dead".into();
        let err = queue.enqueue(bad, EnqueueOptions::default()).await.unwrap_err();
        assert!(matches!(err, JobError::Validation(_)));
        assert_eq!(queue.stats().await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn test_exactly_one_resolution() {
        let queue = queue_with(30_000);
        queue.enqueue(payload("t1"), EnqueueOptions::default()).await.unwrap();
        let lease = queue.lease("w1").await.unwrap().unwrap();

        assert_ok!(queue.ack(&lease, result()).await);
        let err = queue
            .nack(&lease, JobFailure::new(FailureReason::Timeout, "late"))
            .await
            .unwrap_err();
        assert!(err.is_lease_lost());
        assert_err!(queue.ack(&lease, result()).await);

        let job = queue.get_job(lease.job_id()).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert!(job.failure.is_none());
    }

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let queue = queue_with(30_000);
        let low = queue
            .enqueue(payload("low"), EnqueueOptions::default().priority(Priority::Low))
            .await
            .unwrap();
        let first = queue.enqueue(payload("a"), EnqueueOptions::default()).await.unwrap();
        let second = queue.enqueue(payload("b"), EnqueueOptions::default()).await.unwrap();
        let urgent = queue
            .enqueue(payload("c"), EnqueueOptions::default().priority(Priority::Critical))
            .await
            .unwrap();

        let mut order = Vec::new();
        while let Some(lease) = queue.lease("w").await.unwrap() {
            order.push(lease.job_id().clone());
        }
        assert_eq!(order, vec![urgent, first, second, low]);
    }

    #[tokio::test]
    async fn test_stall_requeue_then_exhaust() {
        let queue = queue_with(20);
        let id = queue.enqueue(payload("t1"), EnqueueOptions::default()).await.unwrap();

        let first = queue.lease("w1").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let report = queue.recover_stalled().await.unwrap();
        assert_eq!(report.requeued, vec![id.clone()]);

        // The revoked lease can no longer resolve the job.
        assert!(queue.ack(&first, result()).await.unwrap_err().is_lease_lost());

        let second = queue.lease("w2").await.unwrap().unwrap();
        assert_eq!(second.job.attempts, 1);
        tokio::time::sleep(Duration::from_millis(40)).await;
        let report = queue.recover_stalled().await.unwrap();
        assert_eq!(report.failed, vec![id.clone()]);

        let job = queue.get_job(&id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(
            job.failure.map(|f| f.reason),
            Some(FailureReason::StalledExhausted)
        );
    }

    #[tokio::test]
    async fn test_renew_keeps_lease_alive() {
        let queue = queue_with(200);
        queue.enqueue(payload("t1"), EnqueueOptions::default()).await.unwrap();
        let lease = queue.lease("w1").await.unwrap().unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_ok!(queue.renew(&lease).await);
            assert!(queue.recover_stalled().await.unwrap().is_empty());
        }
        assert_ok!(queue.ack(&lease, result()).await);
    }

    #[tokio::test]
    async fn test_release_does_not_count_stall() {
        let queue = queue_with(30_000);
        let id = queue.enqueue(payload("t1"), EnqueueOptions::default()).await.unwrap();
        let lease = queue.lease("w1").await.unwrap().unwrap();

        assert_ok!(queue.release(&lease).await);
        assert!(queue.renew(&lease).await.unwrap_err().is_lease_lost());

        let again = queue.lease("w2").await.unwrap().unwrap();
        assert_eq!(again.job_id(), &id);
        assert_eq!(again.job.attempts, 0);
    }

    #[tokio::test]
    async fn test_retention_evicts_oldest() {
        let queue = InMemoryJobQueue::new(QueueConfig {
            retention: RetentionConfig {
                completed: TerminalRetention::new(2, 0),
                failed: TerminalRetention::new(1, 0),
            },
            ..QueueConfig::default()
        });

        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(
                queue
                    .enqueue(payload(&format!("t{i}")), EnqueueOptions::default())
                    .await
                    .unwrap(),
            );
            let lease = queue.lease("w").await.unwrap().unwrap();
            queue.ack(&lease, result()).await.unwrap();
        }

        assert!(queue.get_job(&ids[0]).await.unwrap().is_none());
        assert!(queue.get_job(&ids[1]).await.unwrap().is_some());
        assert!(queue.get_job(&ids[2]).await.unwrap().is_some());
        assert_eq!(queue.stats().await.unwrap().completed, 2);
    }

    #[tokio::test]
    async fn test_per_job_retention_override() {
        let queue = queue_with(30_000);
        let keep_none = RetentionConfig {
            completed: TerminalRetention::new(0, 0),
            failed: TerminalRetention::new(0, 0),
        };
        let id = queue
            .enqueue(payload("t1"), EnqueueOptions::default().retention(keep_none))
            .await
            .unwrap();
        let lease = queue.lease("w").await.unwrap().unwrap();
        queue
            .nack(&lease, JobFailure::new(FailureReason::NoResultFound, "exit 0"))
            .await
            .unwrap();

        assert!(queue.get_job(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close() {
        let queue = queue_with(30_000);
        assert_ok!(queue.health_check().await);
        queue.close().await.unwrap();
        assert!(matches!(queue.health_check().await, Err(JobError::Closed)));
        assert!(matches!(queue.lease("w").await, Err(JobError::Closed)));
    }
}
