//! # Vanity Config
//!
//! Configuration management for the vanity salt system.
//! Supports layered configuration from files, `VANITY_`-prefixed
//! environment variables and the flat variables used by older deployments.

mod app_config;
mod broker;
mod loader;
mod validation;

pub use app_config::*;
pub use broker::*;
pub use loader::*;
pub use validation::*;
