//! Identifier types: named categories of identifiers with a format contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Alphabet, IdentifierTypeId};

/// Whether an identifier of this type must be tied to a location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationBehavior {
    /// A location must be supplied.
    Required,
    /// Locations are ignored.
    #[default]
    NotUsed,
}

/// Uniqueness contract of issued identifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UniquenessBehavior {
    /// Unique across the whole system.
    #[default]
    Unique,
    /// Duplicates allowed.
    NotUnique,
    /// Unique within one location.
    UniquePerLocation,
}

/// Check character algorithm attached to an identifier type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum CheckDigitAlgorithm {
    /// No check character.
    #[default]
    None,
    /// Decimal Luhn (mod 10).
    Mod10Luhn,
    /// Luhn mod N over a custom alphabet.
    ModN {
        /// Alphabet whose size is the modulus.
        alphabet: Alphabet,
    },
}

/// A named category of identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierType {
    /// Unique id.
    pub id: IdentifierTypeId,

    /// Display name, unique among non-retired types.
    pub name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Regular expression every identifier must fully match.
    #[serde(default)]
    pub format_regex: Option<String>,

    /// Human readable form of `format_regex`.
    #[serde(default)]
    pub format_description: Option<String>,

    /// Whether patients must carry an identifier of this type.
    #[serde(default)]
    pub required: bool,

    /// Location handling.
    #[serde(default)]
    pub location_behavior: LocationBehavior,

    /// Uniqueness contract.
    #[serde(default)]
    pub uniqueness_behavior: UniquenessBehavior,

    /// Check character algorithm.
    #[serde(default)]
    pub check_digit: CheckDigitAlgorithm,

    /// Retired types cannot issue identifiers.
    #[serde(default)]
    pub retired: bool,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Input for creating an identifier type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewIdentifierType {
    /// Display name.
    pub name: String,

    /// Description.
    #[serde(default)]
    pub description: String,

    /// Format regular expression.
    #[serde(default)]
    pub format_regex: Option<String>,

    /// Format description.
    #[serde(default)]
    pub format_description: Option<String>,

    /// Required flag.
    #[serde(default)]
    pub required: bool,

    /// Location handling.
    #[serde(default)]
    pub location_behavior: LocationBehavior,

    /// Uniqueness contract.
    #[serde(default)]
    pub uniqueness_behavior: UniquenessBehavior,

    /// Check character algorithm.
    #[serde(default)]
    pub check_digit: CheckDigitAlgorithm,
}

impl NewIdentifierType {
    /// Validate field-level constraints.
    ///
    /// Name uniqueness and regex compilation are checked by the admin service.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("name cannot be empty".to_string());
        }
        if name.len() > 255 {
            return Err("name cannot exceed 255 characters".to_string());
        }
        if self
            .format_regex
            .as_deref()
            .is_some_and(|re| re.trim().is_empty())
        {
            return Err("format_regex cannot be blank".to_string());
        }
        Ok(())
    }

    /// Build the stored record.
    #[must_use]
    pub fn into_identifier_type(self) -> IdentifierType {
        IdentifierType {
            id: IdentifierTypeId::new(),
            name: self.name.trim().to_string(),
            description: self.description,
            format_regex: self.format_regex,
            format_description: self.format_description,
            required: self.required,
            location_behavior: self.location_behavior,
            uniqueness_behavior: self.uniqueness_behavior,
            check_digit: self.check_digit,
            retired: false,
            created_at: Utc::now(),
        }
    }
}
