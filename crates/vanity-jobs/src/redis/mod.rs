//! Redis-backed job queue implementation.

mod queue;

pub use queue::RedisJobQueue;

use crate::error::{JobError, JobResult};
use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;
use vanity_config::BrokerConfig;

/// Create a Redis connection pool.
pub async fn create_pool(config: &BrokerConfig) -> JobResult<Pool> {
    info!(broker = %config.connection, "Creating Redis connection pool for job queue...");

    let url = config
        .connection
        .connection_url()
        .map_err(JobError::Configuration)?;
    let cfg = Config::from_url(url);

    let pool = cfg
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .create_timeout(Some(config.connect_timeout()))
        .wait_timeout(Some(config.connect_timeout()))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {}", e)))?;

    // Test connection
    let mut conn = pool.get().await?;
    redis::cmd("PING")
        .query_async::<String>(&mut *conn)
        .await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Redis key builder for one queue.
///
/// All keys live under `{prefix}:{queue}` so several queues can share a
/// database.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    base: String,
}

impl RedisKeys {
    /// Create a key builder for `queue_name` under `prefix`.
    pub fn new(prefix: &str, queue_name: &str) -> Self {
        Self {
            base: format!("{}:{}", prefix, queue_name),
        }
    }

    /// Waiting jobs (sorted set by priority + enqueue time).
    pub fn waiting(&self) -> String {
        format!("{}:waiting", self.base)
    }

    /// Active leases (sorted set of `job_id|token` by lease expiry).
    pub fn active(&self) -> String {
        format!("{}:active", self.base)
    }

    /// Job record (string, JSON).
    pub fn job(&self, job_id: &str) -> String {
        format!("{}:job:{}", self.base, job_id)
    }

    /// Retained completed jobs (sorted set by finish time).
    pub fn completed(&self) -> String {
        format!("{}:completed", self.base)
    }

    /// Retained failed jobs (sorted set by finish time).
    pub fn failed(&self) -> String {
        format!("{}:failed", self.base)
    }
}

/// Active-set member for a lease.
pub(crate) fn lease_member(job_id: &str, token: &str) -> String {
    format!("{}|{}", job_id, token)
}

/// Splits an active-set member into job id and token.
pub(crate) fn parse_lease_member(member: &str) -> Option<(&str, &str)> {
    member.split_once('|')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_keys() {
        let keys = RedisKeys::new("vanity", "vanitySalt");

        assert_eq!(keys.waiting(), "vanity:vanitySalt:waiting");
        assert_eq!(keys.active(), "vanity:vanitySalt:active");
        assert_eq!(keys.job("123"), "vanity:vanitySalt:job:123");
        assert_eq!(keys.completed(), "vanity:vanitySalt:completed");
        assert_eq!(keys.failed(), "vanity:vanitySalt:failed");
    }

    #[test]
    fn test_lease_member_roundtrip() {
        let member = lease_member("0191-abc", "f00d");
        assert_eq!(parse_lease_member(&member), Some(("0191-abc", "f00d")));
        assert_eq!(parse_lease_member("no-separator"), None);
    }
}
