//! Identifier format validation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;

use crate::domain::IdentifierType;
use crate::service::check_digit;

/// Reasons a finished identifier is rejected by its type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Blank value.
    #[error("identifier is empty")]
    Empty,

    /// The value does not match the type's format.
    #[error("'{value}' does not match format {pattern}")]
    FormatMismatch {
        /// Rejected value.
        value: String,
        /// Format regex of the type.
        pattern: String,
    },

    /// The trailing check character is wrong.
    #[error("'{0}' has an invalid check digit")]
    InvalidCheckDigit(String),

    /// The type's format regex does not compile.
    #[error("invalid format regex '{pattern}': {reason}")]
    InvalidPattern {
        /// Offending regex.
        pattern: String,
        /// Compiler message.
        reason: String,
    },
}

/// Compile a format regex so that it must match the whole identifier.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidPattern`] if the regex does not compile.
pub fn compile_format(pattern: &str) -> Result<Regex, ValidationError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| ValidationError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Validates identifiers against their type, caching compiled formats.
#[derive(Default)]
pub struct Validator {
    formats: RwLock<HashMap<String, Arc<Regex>>>,
}

impl Validator {
    /// Create a validator with an empty format cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a finished identifier (check character included).
    ///
    /// # Errors
    ///
    /// Returns the first rule the identifier violates.
    pub fn validate(&self, identifier_type: &IdentifierType, value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::Empty);
        }

        if let Some(pattern) = identifier_type.format_regex.as_deref() {
            let regex = self.format(pattern)?;
            if !regex.is_match(value) {
                return Err(ValidationError::FormatMismatch {
                    value: value.to_string(),
                    pattern: pattern.to_string(),
                });
            }
        }

        if !check_digit::verify(value, &identifier_type.check_digit) {
            return Err(ValidationError::InvalidCheckDigit(value.to_string()));
        }

        Ok(())
    }

    fn format(&self, pattern: &str) -> Result<Arc<Regex>, ValidationError> {
        if let Some(regex) = self.formats.read().get(pattern) {
            return Ok(Arc::clone(regex));
        }

        let regex = Arc::new(compile_format(pattern)?);
        self.formats
            .write()
            .insert(pattern.to_string(), Arc::clone(&regex));
        Ok(regex)
    }
}
