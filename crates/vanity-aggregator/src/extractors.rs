//! Validated JSON extractor.
//!
//! Malformed and invalid bodies are both answered with 400 Bad Request and a
//! JSON error body.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};
use vanity_core::{ErrorResponse, FieldError};

/// JSON extractor that validates the deserialized value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

/// Rejection type for validated JSON extraction.
pub enum ValidatedJsonRejection {
    /// Body is not JSON of the expected shape.
    JsonError(JsonRejection),
    /// Body parsed but failed validation.
    ValidationError(ValidationErrors),
}

impl IntoResponse for ValidatedJsonRejection {
    fn into_response(self) -> Response {
        let error_response = match self {
            Self::JsonError(rejection) => ErrorResponse {
                code: "INVALID_JSON".to_string(),
                message: format!("Invalid JSON: {}", rejection.body_text()),
                details: None,
            },
            Self::ValidationError(errors) => ErrorResponse {
                code: "VALIDATION_ERROR".to_string(),
                message: "Request validation failed".to_string(),
                details: Some(convert_validation_errors(&errors)),
            },
        };
        (StatusCode::BAD_REQUEST, Json(error_response)).into_response()
    }
}

/// Flattens validator errors, including nested structs, into field errors.
fn convert_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut field_errors = Vec::new();

    for (field, kind) in errors.errors() {
        match kind {
            ValidationErrorsKind::Field(errs) => {
                for err in errs {
                    let message = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Validation failed for field '{}'", field));
                    field_errors.push(FieldError {
                        field: field.to_string(),
                        message,
                        code: err.code.to_string(),
                    });
                }
            }
            ValidationErrorsKind::Struct(nested) => {
                for nested_err in convert_validation_errors(nested) {
                    field_errors.push(FieldError {
                        field: format!("{}.{}", field, nested_err.field),
                        ..nested_err
                    });
                }
            }
            ValidationErrorsKind::List(items) => {
                for (index, item_errors) in items {
                    for nested_err in convert_validation_errors(item_errors) {
                        field_errors.push(FieldError {
                            field: format!("{}[{}].{}", field, index, nested_err.field),
                            ..nested_err
                        });
                    }
                }
            }
        }
    }

    field_errors.sort_by(|a, b| a.field.cmp(&b.field));
    field_errors
}

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ValidatedJsonRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(ValidatedJsonRejection::JsonError)?;

        value
            .validate()
            .map_err(ValidatedJsonRejection::ValidationError)?;

        Ok(ValidatedJson(value))
    }
}
