//! Auto-generation policy resolution.

use std::sync::Arc;

use crate::domain::{EffectivePolicy, IdentifierTypeId, LocationId, PolicyScope};
use crate::error::{IdGenError, Result};
use crate::storage::Storage;

/// Finds the policy governing an (identifier type, location) pair.
///
/// A location-specific policy wins over the global one for the same type.
/// Pair uniqueness is enforced when policies are written.
pub struct PolicyResolver {
    storage: Arc<dyn Storage>,
}

impl PolicyResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Resolve the effective policy.
    ///
    /// # Errors
    ///
    /// Returns `NoPolicyConfigured` if neither a location nor a global policy exists.
    pub async fn resolve(
        &self,
        identifier_type: IdentifierTypeId,
        location: Option<&LocationId>,
    ) -> Result<EffectivePolicy> {
        if let Some(location) = location {
            if let Some(policy) = self
                .storage
                .find_policy(identifier_type, Some(location))
                .await?
            {
                return Ok(EffectivePolicy {
                    policy,
                    scope: PolicyScope::Location,
                });
            }
        }

        match self.storage.find_policy(identifier_type, None).await? {
            Some(policy) => Ok(EffectivePolicy {
                policy,
                scope: PolicyScope::Global,
            }),
            None => Err(IdGenError::NoPolicyConfigured {
                identifier_type,
                location: location.cloned(),
            }),
        }
    }
}
