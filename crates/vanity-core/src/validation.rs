//! Validation utilities.

use crate::{FieldError, VanityError};
use validator::{Validate, ValidationErrors};

/// Extension trait for validation.
pub trait ValidateExt: Validate {
    /// Validates the struct and returns a `VanityError` on failure.
    fn validate_request(&self) -> Result<(), VanityError> {
        self.validate().map_err(validation_errors_to_vanity_error)
    }
}

impl<T: Validate> ValidateExt for T {}

/// Flattens `validator::ValidationErrors` into field errors.
#[must_use]
pub fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields: Vec<FieldError> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| FieldError {
                field: (*field).to_string(),
                message: error
                    .message
                    .as_ref()
                    .map_or_else(|| error.code.to_string(), ToString::to_string),
                code: error.code.to_string(),
            })
        })
        .collect();
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    fields
}

/// Converts `validator::ValidationErrors` to `VanityError`.
#[must_use]
pub fn validation_errors_to_vanity_error(errors: ValidationErrors) -> VanityError {
    let message = field_errors(&errors)
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ");

    VanityError::Validation(message)
}

/// Returns true if `value` is `0x` followed by exactly `digits` hex digits.
///
/// Hex digits are accepted in either case.
#[must_use]
pub fn is_prefixed_hex(value: &str, digits: usize) -> bool {
    value
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == digits && hex.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Common validation functions.
pub mod rules {
    use super::is_prefixed_hex;
    use validator::ValidationError;

    /// Hex digits in a 20-byte address.
    pub const ADDRESS_HEX_DIGITS: usize = 40;

    /// Hex digits in a 32-byte word (digest or salt).
    pub const WORD_HEX_DIGITS: usize = 64;

    /// Validates that a string is not blank (not empty after trimming).
    pub fn not_blank(value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::new("not_blank"));
        }
        Ok(())
    }

    /// Validates a `0x`-prefixed 20-byte hex address.
    pub fn hex_address(value: &str) -> Result<(), ValidationError> {
        if !is_prefixed_hex(value, ADDRESS_HEX_DIGITS) {
            return Err(ValidationError::new("hex_address")
                .with_message("expected 0x followed by 40 hex digits".into()));
        }
        Ok(())
    }

    /// Validates a `0x`-prefixed 32-byte hex word.
    pub fn hex_word(value: &str) -> Result<(), ValidationError> {
        if !is_prefixed_hex(value, WORD_HEX_DIGITS) {
            return Err(ValidationError::new("hex_word")
                .with_message("expected 0x followed by 64 hex digits".into()));
        }
        Ok(())
    }
}
