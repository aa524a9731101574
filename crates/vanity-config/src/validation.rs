//! Configuration validation module.
//!
//! Provides validation for all configuration values, failing fast on
//! invalid configuration rather than at runtime.

use crate::{AppConfig, BrokerConnection};
use std::fmt;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// A required value is empty.
    MissingValue { name: String },
    /// Port number is invalid (must be 1-65535).
    InvalidPort { name: String, value: u16 },
    /// URL format is invalid.
    InvalidUrl { url_type: String, message: String },
    /// Timeout value must be positive.
    NonPositiveTimeout { name: String, value: u64 },
    /// The compute deadline does not fit under the broker job timeout.
    DeadlineExceedsJobTimeout { deadline_ms: u64, job_timeout_ms: u64 },
    /// Leases would expire before being renewed.
    RenewIntervalTooLong { renew_ms: u64, lease_ms: u64 },
    /// Pool size must be positive.
    InvalidPoolSize { value: usize },
    /// Log level is invalid.
    InvalidLogLevel { value: String },
    /// Log format is invalid.
    InvalidLogFormat { value: String },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingValue { name } => write!(f, "Missing required value: {}", name),
            Self::InvalidPort { name, value } => {
                write!(f, "Invalid port for {}: {} (must be 1-65535)", name, value)
            }
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {} URL: {}", url_type, message)
            }
            Self::NonPositiveTimeout { name, value } => {
                write!(f, "Timeout '{}' must be positive, got {}", name, value)
            }
            Self::DeadlineExceedsJobTimeout {
                deadline_ms,
                job_timeout_ms,
            } => write!(
                f,
                "Worker deadline ({} ms) must be shorter than the queue job timeout ({} ms)",
                deadline_ms, job_timeout_ms
            ),
            Self::RenewIntervalTooLong { renew_ms, lease_ms } => write!(
                f,
                "Lease renew interval ({} ms) must be shorter than the lease duration ({} ms)",
                renew_ms, lease_ms
            ),
            Self::InvalidPoolSize { value } => {
                write!(f, "Invalid broker pool size: {} (must be positive)", value)
            }
            Self::InvalidLogLevel { value } => write!(
                f,
                "Invalid log level: '{}' (valid: trace, debug, info, warn, error)",
                value
            ),
            Self::InvalidLogFormat { value } => {
                write!(f, "Invalid log format: '{}' (valid: pretty, json)", value)
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Valid log levels.
    const VALID_LOG_LEVELS: &'static [&'static str] = &["trace", "debug", "info", "warn", "error"];
    /// Valid log formats.
    const VALID_LOG_FORMATS: &'static [&'static str] = &["pretty", "json"];

    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    ///
    /// # Errors
    ///
    /// Returns every validation error found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        Self::validate_worker(config, &mut errors);
        Self::validate_queue(&config.queue, &mut errors);
        Self::validate_broker(&config.broker, &mut errors);
        Self::validate_observability(&config.observability, &mut errors);

        if config.aggregator.port == 0 {
            errors.push(ConfigValidationError::InvalidPort {
                name: "aggregator.port".to_string(),
                value: 0,
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_worker(config: &AppConfig, errors: &mut Vec<ConfigValidationError>) {
        let worker = &config.worker;

        if worker.device_id.trim().is_empty() {
            errors.push(ConfigValidationError::MissingValue {
                name: "worker.device_id".to_string(),
            });
        }
        if worker.miner_path.trim().is_empty() {
            errors.push(ConfigValidationError::MissingValue {
                name: "worker.miner_path".to_string(),
            });
        }

        for (name, value) in [
            ("worker.deadline_ms", worker.deadline_ms),
            ("worker.interrupt_grace_ms", worker.interrupt_grace_ms),
            ("worker.flush_timeout_ms", worker.flush_timeout_ms),
            ("worker.poll_interval_ms", worker.poll_interval_ms),
            ("worker.settle_retry_delay_ms", worker.settle_retry_delay_ms),
        ] {
            if value == 0 {
                errors.push(ConfigValidationError::NonPositiveTimeout {
                    name: name.to_string(),
                    value,
                });
            }
        }

        if worker.deadline_ms >= config.queue.job_timeout_ms {
            errors.push(ConfigValidationError::DeadlineExceedsJobTimeout {
                deadline_ms: worker.deadline_ms,
                job_timeout_ms: config.queue.job_timeout_ms,
            });
        }
    }

    fn validate_queue(config: &crate::QueueConfig, errors: &mut Vec<ConfigValidationError>) {
        if config.name.trim().is_empty() {
            errors.push(ConfigValidationError::MissingValue {
                name: "queue.name".to_string(),
            });
        }

        for (name, value) in [
            ("queue.job_timeout_ms", config.job_timeout_ms),
            ("queue.lease_duration_ms", config.lease_duration_ms),
            ("queue.lease_renew_interval_ms", config.lease_renew_interval_ms),
            ("queue.stall_check_interval_ms", config.stall_check_interval_ms),
        ] {
            if value == 0 {
                errors.push(ConfigValidationError::NonPositiveTimeout {
                    name: name.to_string(),
                    value,
                });
            }
        }

        if config.lease_renew_interval_ms >= config.lease_duration_ms {
            errors.push(ConfigValidationError::RenewIntervalTooLong {
                renew_ms: config.lease_renew_interval_ms,
                lease_ms: config.lease_duration_ms,
            });
        }
    }

    fn validate_broker(config: &crate::BrokerConfig, errors: &mut Vec<ConfigValidationError>) {
        if config.pool_size == 0 {
            errors.push(ConfigValidationError::InvalidPoolSize { value: 0 });
        }

        match &config.connection {
            BrokerConnection::Url { url } => {
                if !url.starts_with("redis://") && !url.starts_with("rediss://") {
                    errors.push(ConfigValidationError::InvalidUrl {
                        url_type: "broker".to_string(),
                        message: "URL must start with redis:// or rediss://".to_string(),
                    });
                }
            }
            BrokerConnection::Discrete { host, port, .. } => {
                if host.trim().is_empty() {
                    errors.push(ConfigValidationError::MissingValue {
                        name: "broker.connection.host".to_string(),
                    });
                }
                if *port == 0 {
                    errors.push(ConfigValidationError::InvalidPort {
                        name: "broker.connection.port".to_string(),
                        value: 0,
                    });
                }
            }
        }

        if let Err(message) = config.connection.connection_url() {
            errors.push(ConfigValidationError::InvalidUrl {
                url_type: "broker".to_string(),
                message,
            });
        }
    }

    fn validate_observability(
        config: &crate::ObservabilityConfig,
        errors: &mut Vec<ConfigValidationError>,
    ) {
        let level = config.log_level.to_lowercase();
        if !Self::VALID_LOG_LEVELS.contains(&level.as_str()) {
            errors.push(ConfigValidationError::InvalidLogLevel {
                value: config.log_level.clone(),
            });
        }

        let format = config.log_format.to_lowercase();
        if !Self::VALID_LOG_FORMATS.contains(&format.as_str()) {
            errors.push(ConfigValidationError::InvalidLogFormat {
                value: config.log_format.clone(),
            });
        }
    }
}

/// Formats validation errors for display.
#[must_use]
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    let mut output = String::from("Configuration validation failed:\n");
    for (i, error) in errors.iter().enumerate() {
        output.push_str(&format!("  {}. {}\n", i + 1, error));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_missing_device_and_miner() {
        let mut config = AppConfig::default();
        config.worker.device_id = " ".to_string();
        config.worker.miner_path = String::new();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.contains(&ConfigValidationError::MissingValue {
            name: "worker.device_id".to_string()
        }));
        assert!(errors.contains(&ConfigValidationError::MissingValue {
            name: "worker.miner_path".to_string()
        }));
    }

    #[test]
    fn test_deadline_must_fit_under_job_timeout() {
        let mut config = AppConfig::default();
        config.worker.deadline_ms = config.queue.job_timeout_ms;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(matches!(
            errors[0],
            ConfigValidationError::DeadlineExceedsJobTimeout { .. }
        ));
    }

    #[test]
    fn test_renew_interval_shorter_than_lease() {
        let mut config = AppConfig::default();
        config.queue.lease_renew_interval_ms = config.queue.lease_duration_ms;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigValidationError::RenewIntervalTooLong { .. })));
    }

    #[test]
    fn test_zero_timeouts_reported() {
        let mut config = AppConfig::default();
        config.worker.interrupt_grace_ms = 0;
        config.worker.poll_interval_ms = 0;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_invalid_broker_url_scheme() {
        let mut config = AppConfig::default();
        config.broker.connection = BrokerConnection::Url {
            url: "http://localhost:6379".into(),
        };

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigValidationError::InvalidUrl { .. })));
    }

    #[test]
    fn test_invalid_log_settings() {
        let mut config = AppConfig::default();
        config.observability.log_level = "verbose".into();
        config.observability.log_format = "xml".into();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        let text = format_validation_errors(&errors);
        assert!(text.contains("verbose") && text.contains("xml"));
    }
}
