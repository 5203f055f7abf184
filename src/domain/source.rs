//! Identifier sources: the generators and pools behind identifier types.
//!
//! A source is one of three strategies. The strategy is a tagged union, so
//! dispatch is a `match` on [`SourceKind`] rather than a lookup by name.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Alphabet, EncodeError, IdentifierTypeId, SequenceFormat, SourceId};

/// Generates identifiers by encoding a monotonic counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequentialSource {
    /// Literal prepended to every identifier.
    #[serde(default)]
    pub prefix: String,

    /// Literal appended to every identifier (before any check character).
    #[serde(default)]
    pub suffix: String,

    /// Digit symbols, first symbol is zero.
    pub base_character_set: Alphabet,

    /// Minimum identifier length; shorter bodies are left padded.
    pub min_length: usize,

    /// Maximum identifier length; larger counters exhaust the source.
    pub max_length: usize,

    /// Counter value of the first identifier.
    #[serde(default)]
    pub first_identifier_base: u64,

    /// Encoded values that must never be issued.
    #[serde(default)]
    pub reserved_identifiers: BTreeSet<String>,
}

impl SequentialSource {
    /// Build the encoding format of this source.
    ///
    /// # Errors
    ///
    /// Returns an error if the length bounds are inconsistent with the affixes.
    pub fn format(&self) -> Result<SequenceFormat, EncodeError> {
        SequenceFormat::new(
            self.base_character_set.clone(),
            self.min_length,
            self.max_length,
            &self.prefix,
            &self.suffix,
        )
    }

    fn validate(&self) -> Result<(), String> {
        let format = self.format().map_err(|e| e.to_string())?;
        format
            .encode(self.first_identifier_base)
            .map_err(|e| format!("first_identifier_base is not encodable: {e}"))?;
        Ok(())
    }
}

/// Order in which pool entries are handed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationOrder {
    /// Load order.
    #[default]
    Sequential,
    /// Any available entry.
    Random,
}

/// A finite pre-loaded set of identifiers handed out by reservation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSource {
    /// Allocation order.
    #[serde(default)]
    pub order: AllocationOrder,
}

/// Delegates issuance to an external system.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSource {
    /// Endpoint URL.
    pub endpoint: String,

    /// Basic auth user.
    #[serde(default)]
    pub username: Option<String>,

    /// Basic auth password.
    #[serde(default)]
    pub password: Option<String>,

    /// Identifiers requested per call.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// When set, the source is never used for automatic assignment.
    #[serde(default)]
    pub skip_automatic_assignment: bool,
}

const fn default_batch_size() -> u32 {
    100
}

impl std::fmt::Debug for RemoteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSource")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "******"))
            .field("batch_size", &self.batch_size)
            .field("skip_automatic_assignment", &self.skip_automatic_assignment)
            .finish()
    }
}

impl RemoteSource {
    fn validate(&self) -> Result<(), String> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| format!("endpoint is not a valid URL: {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err("endpoint must use http or https".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be at least 1".to_string());
        }
        if self.password.is_some() && self.username.is_none() {
            return Err("password given without username".to_string());
        }
        Ok(())
    }
}

/// Source strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceKind {
    /// Counter based.
    Sequential(SequentialSource),
    /// Pre-loaded pool.
    Pool(PoolSource),
    /// External provider.
    Remote(RemoteSource),
}

impl SourceKind {
    /// Short name of the strategy, used in logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Sequential(_) => "sequential",
            Self::Pool(_) => "pool",
            Self::Remote(_) => "remote",
        }
    }

    /// Validate strategy-specific constraints.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Sequential(seq) => seq.validate(),
            Self::Pool(_) => Ok(()),
            Self::Remote(remote) => remote.validate(),
        }
    }
}

/// A configured identifier source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierSource {
    /// Unique id.
    pub id: SourceId,

    /// Display name.
    pub name: String,

    /// Description.
    #[serde(default)]
    pub description: String,

    /// Identifier type this source issues.
    pub identifier_type: IdentifierTypeId,

    /// Retired sources cannot issue identifiers.
    #[serde(default)]
    pub retired: bool,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Strategy.
    #[serde(flatten)]
    pub kind: SourceKind,
}

impl IdentifierSource {
    /// Copy with credentials masked, for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let SourceKind::Remote(remote) = &mut copy.kind {
            if remote.password.is_some() {
                remote.password = Some("******".to_string());
            }
        }
        copy
    }
}

/// Input for creating an identifier source.
#[derive(Debug, Clone, Deserialize)]
pub struct NewIdentifierSource {
    /// Display name.
    pub name: String,

    /// Description.
    #[serde(default)]
    pub description: String,

    /// Identifier type this source issues.
    pub identifier_type: IdentifierTypeId,

    /// Initial pool contents (pool sources only).
    #[serde(default)]
    pub identifiers: Vec<String>,

    /// Strategy.
    #[serde(flatten)]
    pub kind: SourceKind,
}

impl NewIdentifierSource {
    /// Validate field-level constraints.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name cannot be empty".to_string());
        }
        if self.name.len() > 255 {
            return Err("name cannot exceed 255 characters".to_string());
        }
        if !self.identifiers.is_empty() && !matches!(self.kind, SourceKind::Pool(_)) {
            return Err("identifiers can only be supplied for pool sources".to_string());
        }
        if self.identifiers.iter().any(|v| v.trim().is_empty()) {
            return Err("pool identifiers cannot be blank".to_string());
        }
        self.kind.validate()
    }

    /// Split into the stored record and the initial pool contents.
    #[must_use]
    pub fn into_parts(self) -> (IdentifierSource, Vec<String>) {
        let source = IdentifierSource {
            id: SourceId::new(),
            name: self.name.trim().to_string(),
            description: self.description,
            identifier_type: self.identifier_type,
            retired: false,
            created_at: Utc::now(),
            kind: self.kind,
        };
        (source, self.identifiers)
    }
}
