//! Auto-generation policies mapping (identifier type, location) to a source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{IdentifierTypeId, LocationId, PolicyId, SourceId};

/// Rule selecting the source and mode used for one identifier type.
///
/// A policy with `location == None` is the global fallback for its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoGenerationPolicy {
    /// Unique id.
    pub id: PolicyId,

    /// Identifier type governed by this policy.
    pub identifier_type: IdentifierTypeId,

    /// Location, or `None` for the global policy.
    #[serde(default)]
    pub location: Option<LocationId>,

    /// Source used for automatic generation.
    pub source: SourceId,

    /// Whether identifiers are generated automatically.
    pub automatic_generation: bool,

    /// Whether users may type identifiers in manually.
    pub manual_entry_allowed: bool,

    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Input for creating or replacing a policy.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyUpsert {
    /// Identifier type.
    pub identifier_type: IdentifierTypeId,

    /// Location, or `None` for the global policy.
    #[serde(default)]
    pub location: Option<LocationId>,

    /// Source.
    pub source: SourceId,

    /// Automatic generation flag.
    #[serde(default = "default_true")]
    pub automatic_generation: bool,

    /// Manual entry flag.
    #[serde(default)]
    pub manual_entry_allowed: bool,
}

const fn default_true() -> bool {
    true
}

impl PolicyUpsert {
    /// Validate field-level constraints.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if !self.automatic_generation && !self.manual_entry_allowed {
            return Err(
                "at least one of automatic_generation or manual_entry_allowed must be set"
                    .to_string(),
            );
        }
        if self
            .location
            .as_ref()
            .is_some_and(|l| l.as_str().trim().is_empty())
        {
            return Err("location cannot be blank; omit it for a global policy".to_string());
        }
        Ok(())
    }

    /// Build the stored record, reusing `id` when replacing an existing policy.
    #[must_use]
    pub fn into_policy(self, id: PolicyId) -> AutoGenerationPolicy {
        AutoGenerationPolicy {
            id,
            identifier_type: self.identifier_type,
            location: self.location,
            source: self.source,
            automatic_generation: self.automatic_generation,
            manual_entry_allowed: self.manual_entry_allowed,
            updated_at: Utc::now(),
        }
    }
}

/// Which policy level matched during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyScope {
    /// A location-specific policy matched.
    Location,
    /// The global policy was used as fallback.
    Global,
}

/// Result of policy resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectivePolicy {
    /// Matched policy.
    pub policy: AutoGenerationPolicy,
    /// Level that matched.
    pub scope: PolicyScope,
}

impl EffectivePolicy {
    /// Source to dispatch to.
    #[must_use]
    pub const fn source(&self) -> SourceId {
        self.policy.source
    }

    /// Whether automatic generation is enabled.
    #[must_use]
    pub const fn automatic_generation(&self) -> bool {
        self.policy.automatic_generation
    }
}
