//! Configuration loader with layered sources.

use crate::{format_validation_errors, AppConfig, BrokerConnection, ConfigValidator};
use config::{Config, ConfigError, Environment, File};
use std::path::Path;
use tracing::{debug, info};
use vanity_core::{VanityError, VanityResult};

/// Configuration loader.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Local overrides
    /// 4. Environment variables with `VANITY_` prefix
    /// 5. Flat legacy variables (`DEVICE_ID`, `MINER_PATH`, `REDIS_*`, ...)
    pub fn new(config_dir: impl Into<String>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Loader for the default location (`./config`).
    #[must_use]
    pub fn from_default_location() -> Self {
        Self::new("./config")
    }

    /// Loads and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a source cannot be parsed or the
    /// resulting configuration is invalid.
    pub fn load(&self) -> VanityResult<AppConfig> {
        // Load .env file if present
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let mut config = self.load_layers()?;
        apply_legacy_env(&mut config, |key| std::env::var(key).ok());

        ConfigValidator::validate(&config)
            .map_err(|errors| VanityError::Configuration(format_validation_errors(&errors)))?;

        Ok(config)
    }

    fn load_layers(&self) -> VanityResult<AppConfig> {
        let environment =
            std::env::var("VANITY_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = format!("{}/{}.toml", self.config_dir, name);
            if Path::new(&path).exists() {
                debug!("Loading config from: {}", path);
                builder = builder.add_source(File::with_name(&path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("VANITY")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize::<AppConfig>())
            .map_err(config_error_to_vanity_error)
    }
}

/// Applies the flat environment variables used by older deployments.
///
/// A non-empty `REDIS_URL` selects URL mode; otherwise any of the
/// discrete `REDIS_*` variables switch to (or amend) discrete mode.
pub fn apply_legacy_env<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(device_id) = get("DEVICE_ID") {
        config.worker.device_id = device_id;
    }
    if let Some(miner_path) = get("MINER_PATH") {
        config.worker.miner_path = miner_path;
    }
    if let Some(deadline) = get("MINING_TIMEOUT_MS").and_then(|v| v.trim().parse().ok()) {
        config.worker.deadline_ms = deadline;
    }
    if let Some(port) = get("PORT").and_then(|v| v.trim().parse().ok()) {
        config.aggregator.port = port;
    }

    if let Some(url) = get("REDIS_URL") {
        config.broker.connection = BrokerConnection::Url {
            url: url.trim().to_string(),
        };
        return;
    }

    let discrete_keys = ["REDIS_HOST", "REDIS_PORT", "REDIS_USERNAME", "REDIS_PASS", "REDIS_TLS"];
    if !discrete_keys.iter().any(|key| get(key).is_some()) {
        return;
    }

    let (mut host, mut port, mut username, mut password, mut tls) = match &config.broker.connection
    {
        BrokerConnection::Discrete {
            host,
            port,
            username,
            password,
            tls,
        } => (host.clone(), *port, username.clone(), password.clone(), *tls),
        BrokerConnection::Url { .. } => ("localhost".to_string(), 6379, None, None, false),
    };

    if let Some(value) = get("REDIS_HOST") {
        host = value;
    }
    if let Some(value) = get("REDIS_PORT").and_then(|v| v.trim().parse().ok()) {
        port = value;
    }
    if let Some(value) = get("REDIS_USERNAME") {
        username = Some(value);
    }
    if let Some(value) = get("REDIS_PASS") {
        password = Some(value);
    }
    if let Some(value) = get("REDIS_TLS") {
        tls = matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes");
    }

    config.broker.connection = BrokerConnection::Discrete {
        host,
        port,
        username,
        password,
        tls,
    };
}

fn config_error_to_vanity_error(err: ConfigError) -> VanityError {
    VanityError::Configuration(err.to_string())
}
