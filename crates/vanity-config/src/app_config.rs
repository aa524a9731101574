//! Application configuration structures.

use crate::BrokerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Worker (device + compute process) configuration.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Broker connection configuration.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Queue policy configuration.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Score aggregator configuration.
    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "vanity-salt".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Worker configuration.
///
/// One worker process is bound to exactly one device for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Compute device identifier passed to the miner.
    pub device_id: String,
    /// Path to the compute binary.
    pub miner_path: String,
    /// Wall-clock budget for one compute run, in milliseconds.
    pub deadline_ms: u64,
    /// Margin kept under a job's broker timeout when deriving its deadline.
    pub deadline_safety_margin_ms: u64,
    /// Time allowed between the interrupt signal and a forced kill.
    pub interrupt_grace_ms: u64,
    /// Time allowed to drain output after the process exits.
    pub flush_timeout_ms: u64,
    /// Vanity threshold used when a job does not carry one.
    pub default_min_leading_bs: u32,
    /// Delay between lease attempts while the queue is empty.
    pub poll_interval_ms: u64,
    /// Retries of a failed ack, nack or release on broker errors.
    pub settle_retries: u32,
    /// First delay between settle retries; doubles per retry.
    pub settle_retry_delay_ms: u64,
    /// Upper bound on the delay between settle retries.
    pub settle_retry_max_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            device_id: "0".to_string(),
            miner_path: "/home/target/release/fourfourfourfour".to_string(),
            deadline_ms: 295_000,
            deadline_safety_margin_ms: 5_000,
            interrupt_grace_ms: 10_000,
            flush_timeout_ms: 1_000,
            default_min_leading_bs: 8,
            poll_interval_ms: 1_000,
            settle_retries: 5,
            settle_retry_delay_ms: 200,
            settle_retry_max_delay_ms: 5_000,
        }
    }
}

impl WorkerConfig {
    /// Returns the compute deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Returns the deadline safety margin.
    #[must_use]
    pub const fn deadline_safety_margin(&self) -> Duration {
        Duration::from_millis(self.deadline_safety_margin_ms)
    }

    /// Returns the interrupt grace period.
    #[must_use]
    pub const fn interrupt_grace(&self) -> Duration {
        Duration::from_millis(self.interrupt_grace_ms)
    }

    /// Returns the output flush timeout.
    #[must_use]
    pub const fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Returns the empty-queue poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the first settle retry delay.
    #[must_use]
    pub const fn settle_retry_delay(&self) -> Duration {
        Duration::from_millis(self.settle_retry_delay_ms)
    }

    /// Returns the settle retry delay cap.
    #[must_use]
    pub const fn settle_retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.settle_retry_max_delay_ms)
    }
}

/// Queue policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue name shared by producers and workers.
    pub name: String,
    /// Default broker job timeout stamped on enqueued jobs, in milliseconds.
    pub job_timeout_ms: u64,
    /// Visibility window of a lease.
    pub lease_duration_ms: u64,
    /// How often a worker renews its lease while a job runs.
    pub lease_renew_interval_ms: u64,
    /// How often idle workers sweep for expired leases.
    pub stall_check_interval_ms: u64,
    /// Stall redeliveries allowed before the job fails.
    pub max_stalled_count: u32,
    /// Terminal job retention.
    pub retention: RetentionConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "vanitySalt".to_string(),
            job_timeout_ms: 300_000,
            lease_duration_ms: 30_000,
            lease_renew_interval_ms: 15_000,
            stall_check_interval_ms: 30_000,
            max_stalled_count: 1,
            retention: RetentionConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Returns the lease visibility window.
    #[must_use]
    pub const fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.lease_duration_ms)
    }

    /// Returns the lease renewal interval.
    #[must_use]
    pub const fn lease_renew_interval(&self) -> Duration {
        Duration::from_millis(self.lease_renew_interval_ms)
    }

    /// Returns the stall sweep interval.
    #[must_use]
    pub const fn stall_check_interval(&self) -> Duration {
        Duration::from_millis(self.stall_check_interval_ms)
    }
}

/// Retention of terminal jobs, per terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Completed job retention.
    pub completed: TerminalRetention,
    /// Failed job retention.
    pub failed: TerminalRetention,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            completed: TerminalRetention::new(10, 7 * 86_400),
            failed: TerminalRetention::new(50, 7 * 86_400),
        }
    }
}

/// Bound on how many terminal jobs of one state are kept, and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalRetention {
    /// Newest jobs kept; older ones are evicted first.
    pub count: usize,
    /// Maximum age in seconds (0 = unbounded).
    #[serde(default)]
    pub max_age_secs: u64,
}

impl TerminalRetention {
    /// Creates a retention bound.
    #[must_use]
    pub const fn new(count: usize, max_age_secs: u64) -> Self {
        Self {
            count,
            max_age_secs,
        }
    }

    /// Returns the maximum age, if bounded.
    #[must_use]
    pub const fn max_age(&self) -> Option<Duration> {
        if self.max_age_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.max_age_secs))
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log format (json, pretty).
    pub log_format: String,
    /// Enable metrics.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
        }
    }
}

/// Score aggregator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Listen host.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Append-only score log.
    pub score_log_path: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            score_log_path: "scores.log".to_string(),
        }
    }
}

impl AggregatorConfig {
    /// Returns the listen address.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_leaves_margin_under_job_timeout() {
        let config = AppConfig::default();
        assert_eq!(
            config.worker.deadline_ms + config.worker.deadline_safety_margin_ms,
            config.queue.job_timeout_ms
        );
    }

    #[test]
    fn test_default_retention() {
        let retention = RetentionConfig::default();
        assert_eq!(retention.completed.count, 10);
        assert_eq!(retention.failed.count, 50);
        assert!(retention.failed.max_age().is_some());
        assert!(TerminalRetention::new(5, 0).max_age().is_none());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"worker": {"device_id": "3"}}"#).unwrap();
        assert_eq!(config.worker.device_id, "3");
        assert_eq!(config.worker.deadline_ms, 295_000);
        assert_eq!(config.queue.name, "vanitySalt");
    }

    #[test]
    fn test_aggregator_addr() {
        assert_eq!(AggregatorConfig::default().addr(), "0.0.0.0:3000");
    }
}
