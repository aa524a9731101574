//! Redis job queue implementation.

use super::{lease_member, parse_lease_member, RedisKeys};
use crate::error::{JobError, JobResult};
use crate::job::{JobId, JobRecord, JobState, Lease, StallDisposition};
use crate::metrics::JobMetrics;
use crate::queue::{prepare_job, EnqueueOptions, JobQueue, Priority, QueueStats, StallReport};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;
use tracing::{debug, info, warn};
use vanity_config::{QueueConfig, TerminalRetention};
use vanity_core::{JobFailure, MiningPayload, MiningResult};

/// Moves the head of the waiting set into the active set under a lease member.
///
/// KEYS: waiting, active. ARGV: token, lease expiry (ms).
const LEASE_SCRIPT: &str = r#"
    local popped = redis.call("zpopmin", KEYS[1])
    if #popped == 0 then
        return false
    end
    local job_id = popped[1]
    redis.call("zadd", KEYS[2], ARGV[2], job_id .. "|" .. ARGV[1])
    return job_id
"#;

/// Writes the activated record while the lease member is still held.
///
/// KEYS: active, job. ARGV: member, record.
const RECORD_LEASE_SCRIPT: &str = r#"
    if not redis.call("zscore", KEYS[1], ARGV[1]) then
        return 0
    end
    redis.call("set", KEYS[2], ARGV[2])
    return 1
"#;

/// Removes the lease member, writes the record and indexes it, or does
/// nothing when the member is gone.
///
/// KEYS: active, job, target set. ARGV: member, record, score, job id.
const RESOLVE_SCRIPT: &str = r#"
    if redis.call("zrem", KEYS[1], ARGV[1]) == 0 then
        return 0
    end
    redis.call("set", KEYS[2], ARGV[2])
    redis.call("zadd", KEYS[3], ARGV[3], ARGV[4])
    return 1
"#;

/// Redis-backed job queue.
///
/// Every transition of an active job runs as one script: removing the
/// `job_id|token` member, writing the record and indexing it happen
/// together or not at all. Whoever removes the member (owner or stall
/// sweeper) owns the resolution.
pub struct RedisJobQueue {
    pool: Pool,
    keys: RedisKeys,
    config: QueueConfig,
}

impl RedisJobQueue {
    /// Create a new Redis job queue.
    pub fn new(pool: Pool, key_prefix: &str, config: QueueConfig) -> Self {
        let keys = RedisKeys::new(key_prefix, &config.name);
        Self { pool, keys, config }
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> JobResult<Connection> {
        Ok(self.pool.get().await?)
    }

    /// Calculate priority score for sorted set.
    /// Higher priority = lower score (processed first).
    /// Score = -priority * 1e12 + timestamp_ms
    fn priority_score(priority: i8, enqueued_at: DateTime<Utc>) -> f64 {
        let priority_component = -(priority as f64) * 1_000_000_000_000.0;
        let time_component = enqueued_at.timestamp_millis() as f64;
        priority_component + time_component
    }

    fn lease_expiry(&self) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::from_std(self.config.lease_duration()).unwrap_or_default()
    }

    async fn load(&self, conn: &mut Connection, job_id: &str) -> JobResult<Option<JobRecord>> {
        let json: Option<String> = conn.get(self.keys.job(job_id)).await?;
        json.map(|json| JobRecord::from_json(&json)).transpose()
    }

    async fn store_waiting(&self, conn: &mut Connection, record: &JobRecord) -> JobResult<()> {
        let score = Self::priority_score(record.priority, record.created_at);
        let _: () = redis::pipe()
            .atomic()
            .set(self.keys.job(record.id.as_str()), record.to_json()?)
            .ignore()
            .zadd(self.keys.waiting(), record.id.as_str(), score)
            .ignore()
            .query_async(conn)
            .await?;
        Ok(())
    }

    /// Resolves the lease `member` into `record`, indexed in `set_key`.
    ///
    /// Returns false when the member was already gone.
    async fn resolve(
        &self,
        conn: &mut Connection,
        member: &str,
        record: &JobRecord,
        set_key: &str,
        score: f64,
    ) -> JobResult<bool> {
        let resolved: i64 = redis::Script::new(RESOLVE_SCRIPT)
            .key(self.keys.active())
            .key(self.keys.job(record.id.as_str()))
            .key(set_key)
            .arg(member)
            .arg(record.to_json()?)
            .arg(score)
            .arg(record.id.as_str())
            .invoke_async(&mut **conn)
            .await?;
        Ok(resolved == 1)
    }

    /// Resolves the lease held by the caller, or reports it lost.
    async fn resolve_lease(&self, lease: &Lease, record: &JobRecord) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let member = lease_member(lease.job_id().as_str(), &lease.token);
        if !self.settle(&mut conn, &member, record).await? {
            return Err(JobError::LeaseLost(lease.job_id().to_string()));
        }
        Ok(())
    }

    /// Routes `record` to the set matching its state and trims retention.
    async fn settle(
        &self,
        conn: &mut Connection,
        member: &str,
        record: &JobRecord,
    ) -> JobResult<bool> {
        let (set_key, score, bound) = match record.state {
            JobState::Waiting => (
                self.keys.waiting(),
                Self::priority_score(record.priority, record.created_at),
                None,
            ),
            JobState::Completed | JobState::Failed => {
                let retention = record.retention.unwrap_or(self.config.retention);
                let (set_key, bound) = if record.state == JobState::Completed {
                    (self.keys.completed(), retention.completed)
                } else {
                    (self.keys.failed(), retention.failed)
                };
                let finished_ms = record.finished_at.unwrap_or_else(Utc::now).timestamp_millis();
                (set_key, finished_ms as f64, Some(bound))
            }
            other => {
                return Err(JobError::InvalidState {
                    expected: "waiting|completed|failed".to_string(),
                    actual: other.to_string(),
                })
            }
        };

        if !self.resolve(conn, member, record, &set_key, score).await? {
            return Ok(false);
        }

        // Already committed; a failed trim only delays eviction
        if let Some(bound) = bound {
            if let Err(e) = self.trim(conn, &set_key, bound).await {
                warn!(set = %set_key, error = %e, "Failed to trim terminal jobs");
            }
        }
        Ok(true)
    }

    /// Evicts terminal jobs beyond the count bound or older than the age bound.
    async fn trim(
        &self,
        conn: &mut Connection,
        set_key: &str,
        bound: TerminalRetention,
    ) -> JobResult<()> {
        let mut evicted: Vec<String> = Vec::new();

        let total: usize = conn.zcard(set_key).await?;
        if total > bound.count {
            let overflow: Vec<String> = conn
                .zrange(set_key, 0, (total - bound.count - 1) as isize)
                .await?;
            evicted.extend(overflow);
        }

        if let Some(max_age) = bound.max_age() {
            let cutoff = Utc::now() - ChronoDuration::from_std(max_age).unwrap_or_default();
            let expired: Vec<String> = conn
                .zrangebyscore(set_key, "-inf", cutoff.timestamp_millis())
                .await?;
            evicted.extend(expired);
        }

        if evicted.is_empty() {
            return Ok(());
        }
        evicted.sort();
        evicted.dedup();

        let mut pipe = redis::pipe();
        pipe.atomic();
        for job_id in &evicted {
            pipe.del(self.keys.job(job_id)).ignore();
            pipe.zrem(set_key, job_id).ignore();
        }
        let _: () = pipe.query_async(&mut *conn).await?;

        debug!(set = %set_key, count = evicted.len(), "Evicted terminal jobs");
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn enqueue(&self, payload: MiningPayload, options: EnqueueOptions) -> JobResult<JobId> {
        let record = prepare_job(&self.config, payload, options)?;
        let mut conn = self.conn().await?;
        self.store_waiting(&mut conn, &record).await?;

        let priority = Priority::from(record.priority);
        JobMetrics::job_enqueued(&self.config.name, &priority.to_string());
        debug!(
            job_id = %record.id,
            token_id = %record.payload.token_id,
            priority = %priority,
            "Enqueued job"
        );

        Ok(record.id)
    }

    async fn lease(&self, worker_id: &str) -> JobResult<Option<Lease>> {
        let mut conn = self.conn().await?;

        loop {
            // The pop and the active entry are one step, so a crash here
            // leaves an expiring lease for the stall sweep
            let token = Lease::new_token();
            let expires_at = self.lease_expiry();
            let popped: Option<String> = redis::Script::new(LEASE_SCRIPT)
                .key(self.keys.waiting())
                .key(self.keys.active())
                .arg(&token)
                .arg(expires_at.timestamp_millis())
                .invoke_async(&mut *conn)
                .await?;
            let Some(job_id) = popped else {
                return Ok(None);
            };
            let member = lease_member(&job_id, &token);

            let Some(mut record) = self.load(&mut conn, &job_id).await? else {
                warn!(job_id = %job_id, "Waiting entry without job record, skipping");
                let _: i64 = conn.zrem(self.keys.active(), &member).await?;
                continue;
            };

            record.activate(worker_id)?;
            let recorded: i64 = redis::Script::new(RECORD_LEASE_SCRIPT)
                .key(self.keys.active())
                .key(self.keys.job(&job_id))
                .arg(&member)
                .arg(record.to_json()?)
                .invoke_async(&mut *conn)
                .await?;
            if recorded == 0 {
                return Err(JobError::LeaseLost(job_id));
            }

            debug!(job_id = %job_id, worker_id = %worker_id, "Leased job");
            return Ok(Some(Lease::with_token(record, token, expires_at)));
        }
    }

    async fn renew(&self, lease: &Lease) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let member = lease_member(lease.job_id().as_str(), &lease.token);
        let expiry = self.lease_expiry().timestamp_millis();

        let (previous, _changed): (Option<f64>, i64) = redis::pipe()
            .atomic()
            .zscore(self.keys.active(), &member)
            .cmd("ZADD")
            .arg(self.keys.active())
            .arg("XX")
            .arg(expiry)
            .arg(&member)
            .query_async(&mut *conn)
            .await?;

        if previous.is_none() {
            return Err(JobError::LeaseLost(lease.job_id().to_string()));
        }
        Ok(())
    }

    async fn ack(&self, lease: &Lease, result: MiningResult) -> JobResult<()> {
        let mut record = lease.job.clone();
        record.complete(result)?;
        self.resolve_lease(lease, &record).await?;

        debug!(job_id = %record.id, "Completed job");
        Ok(())
    }

    async fn nack(&self, lease: &Lease, failure: JobFailure) -> JobResult<()> {
        let mut record = lease.job.clone();
        record.fail(failure)?;
        self.resolve_lease(lease, &record).await?;

        debug!(job_id = %record.id, "Failed job");
        Ok(())
    }

    async fn release(&self, lease: &Lease) -> JobResult<()> {
        let mut record = lease.job.clone();
        record.release()?;
        self.resolve_lease(lease, &record).await?;

        debug!(job_id = %record.id, "Released job");
        Ok(())
    }

    async fn recover_stalled(&self) -> JobResult<StallReport> {
        let mut conn = self.conn().await?;
        let now = Utc::now().timestamp_millis();

        let expired: Vec<String> = conn
            .zrangebyscore(self.keys.active(), "-inf", now)
            .await?;

        let mut report = StallReport::default();
        for member in expired {
            let Some((job_id, _token)) = parse_lease_member(&member) else {
                let _: i64 = conn.zrem(self.keys.active(), &member).await?;
                warn!(member = %member, "Malformed active entry removed");
                continue;
            };
            let Some(mut record) = self.load(&mut conn, job_id).await? else {
                let _: i64 = conn.zrem(self.keys.active(), &member).await?;
                warn!(job_id = %job_id, "Active entry without job record removed");
                continue;
            };
            if record.state.is_terminal() {
                // Resolved by an owner between the scan and the load
                continue;
            }

            let disposition = record.stall(self.config.max_stalled_count)?;
            // Whoever removes the member owns the resolution
            if !self.settle(&mut conn, &member, &record).await? {
                continue;
            }

            match disposition {
                StallDisposition::Requeued => {
                    JobMetrics::job_stalled(&self.config.name, "requeued");
                    warn!(job_id = %job_id, attempts = record.attempts, "Requeued stalled job");
                    report.requeued.push(record.id);
                }
                StallDisposition::Exhausted => {
                    JobMetrics::job_stalled(&self.config.name, "exhausted");
                    warn!(
                        job_id = %job_id,
                        attempts = record.attempts,
                        "Stalled job exhausted its redeliveries"
                    );
                    report.failed.push(record.id);
                }
            }
        }

        if !report.is_empty() {
            info!(
                requeued = report.requeued.len(),
                failed = report.failed.len(),
                "Recovered stalled jobs"
            );
        }

        Ok(report)
    }

    async fn get_job(&self, job_id: &JobId) -> JobResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        self.load(&mut conn, job_id.as_str()).await
    }

    async fn stats(&self) -> JobResult<QueueStats> {
        let mut conn = self.conn().await?;
        let (waiting, active, completed, failed): (u64, u64, u64, u64) = redis::pipe()
            .zcard(self.keys.waiting())
            .zcard(self.keys.active())
            .zcard(self.keys.completed())
            .zcard(self.keys.failed())
            .query_async(&mut *conn)
            .await?;

        Ok(QueueStats {
            queue: self.config.name.clone(),
            waiting,
            active,
            completed,
            failed,
        })
    }

    async fn health_check(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }

    async fn close(&self) -> JobResult<()> {
        self.pool.close();
        info!(queue = %self.config.name, "Closed Redis connection pool");
        Ok(())
    }
}
