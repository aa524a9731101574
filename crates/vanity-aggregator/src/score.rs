//! Score report payload.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// How a score was made up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ScoreBreakdown {
    #[validate(custom(function = "finite"))]
    pub leading_zeros: f64,

    #[validate(custom(function = "finite"))]
    pub extra_leading_zeros: f64,

    #[validate(custom(function = "finite"))]
    pub other_zeros: f64,
}

/// A scored address posted by a miner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ScoreReport {
    #[validate(custom(function = "finite"))]
    pub score: f64,

    #[validate(length(min = 1, message = "Address must not be empty"))]
    pub address: String,

    #[validate(length(min = 1, message = "Salt must not be empty"))]
    pub salt: String,

    #[validate(nested)]
    pub score_breakdown: ScoreBreakdown,
}

fn finite(value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        let mut error = ValidationError::new("finite");
        error.message = Some("Value must be a finite number".into());
        Err(error)
    }
}
