//! Logging initialization shared by the binaries.

use crate::{VanityError, VanityResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, one event per line.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a configured format name; unknown names fall back to pretty.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Builds the fallback filter used when `RUST_LOG` is not set.
#[must_use]
pub fn default_directives(level: &str, extra: &[&str]) -> String {
    let mut directives = vec![level.trim().to_lowercase()];
    directives.extend(extra.iter().map(ToString::to_string));
    directives.join(",")
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `level` and `extra` when set.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(level: &str, format: &str, extra: &[&str]) -> VanityResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level, extra)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match LogFormat::from_name(format) {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
    };

    result.map_err(|e| VanityError::internal(format!("failed to initialize logging: {e}")))
}
