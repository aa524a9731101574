//! # Vanity Core
//!
//! Core types, error definitions and validation rules shared by the
//! vanity salt worker, producer and aggregator.

pub mod error;
pub mod mining;
pub mod result;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod validation;

pub use error::*;
pub use mining::*;
pub use result::*;
pub use validation::*;
