//! Unified error types shared by all vanity crates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for the vanity salt system.
#[derive(Error, Debug)]
pub enum VanityError {
    /// Resource not found
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Broker (queue backend) error
    #[error("Broker error: {0}")]
    Broker(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VanityError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Validation(_) => 400,
            Self::Broker(_) => 503,
            Self::Configuration(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Broker(_) => "BROKER_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a not found error for a resource.
    #[must_use]
    pub fn not_found<T: ToString>(resource_type: &'static str, id: T) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }
}

/// JSON error body returned by HTTP endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Field-level details for validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

/// Field-level validation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field name
    pub field: String,
    /// Error message
    pub message: String,
    /// Error code
    pub code: String,
}

impl ErrorResponse {
    /// Creates a new error response from a `VanityError`.
    #[must_use]
    pub fn from_error(error: &VanityError) -> Self {
        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
            details: None,
        }
    }

    /// Attaches field-level details.
    #[must_use]
    pub fn with_details(mut self, details: Vec<FieldError>) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<&VanityError> for ErrorResponse {
    fn from(error: &VanityError) -> Self {
        Self::from_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(VanityError::validation("bad").status_code(), 400);
        assert_eq!(VanityError::not_found("job", "42").status_code(), 404);
        assert_eq!(VanityError::Broker("down".into()).status_code(), 503);
        assert_eq!(VanityError::internal("boom").status_code(), 500);
    }

    #[test]
    fn test_not_found_display() {
        let err = VanityError::not_found("job", "abc");
        let msg = err.to_string();
        assert!(msg.contains("job") && msg.contains("abc"));
    }

    #[test]
    fn test_error_response_from_error() {
        let err = VanityError::configuration("missing device id");
        let response = ErrorResponse::from(&err);
        assert_eq!(response.code, "CONFIGURATION_ERROR");
        assert!(response.message.contains("missing device id"));
        assert!(response.details.is_none());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(VanityError::Broker("down".into()).error_code(), "BROKER_ERROR");
        assert_eq!(VanityError::internal("boom").error_code(), "INTERNAL_ERROR");
        assert_eq!(VanityError::configuration("x").status_code(), 500);
    }
}
