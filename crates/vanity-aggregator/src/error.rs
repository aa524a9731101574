//! Aggregator errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use vanity_core::{ErrorResponse, VanityError};

/// Errors raised while recording a score.
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("Failed to write score log: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize score: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<AggregatorError> for VanityError {
    fn from(err: AggregatorError) -> Self {
        VanityError::internal(err.to_string())
    }
}

/// Application error type for Axum.
#[derive(Debug)]
pub struct AppError(pub VanityError);

impl From<VanityError> for AppError {
    fn from(err: VanityError) -> Self {
        Self(err)
    }
}

impl From<AggregatorError> for AppError {
    fn from(err: AggregatorError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (status, Json(ErrorResponse::from_error(&self.0))).into_response()
    }
}
