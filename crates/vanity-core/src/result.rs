//! Result type aliases.

use crate::VanityError;

/// A specialized `Result` type for vanity operations.
pub type VanityResult<T> = Result<T, VanityError>;
