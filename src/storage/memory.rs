//! In-memory storage backend.
//!
//! Non-durable. Used for tests and throwaway deployments; every map entry is
//! guarded by its `dashmap` shard lock, which makes each operation atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::domain::{
    AllocationOrder, AutoGenerationPolicy, IdentifierSource, IdentifierType, IdentifierTypeId,
    LocationId, PolicyId, PoolCounts, PoolState, ReservationOutcome, ReservationToken,
    SequenceState, SourceId,
};
use crate::error::{StorageError, StorageResult};
use crate::storage::traits::{ConfigStorage, PoolStorage, SequenceStorage, Storage};

/// In-memory storage implementation.
#[derive(Default)]
pub struct MemoryStorage {
    sequences: DashMap<SourceId, SequenceState>,
    pools: DashMap<SourceId, PoolState>,
    types: DashMap<IdentifierTypeId, IdentifierType>,
    sources: DashMap<SourceId, IdentifierSource>,
    policies: RwLock<HashMap<PolicyId, AutoGenerationPolicy>>,
    type_names: Mutex<()>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceStorage for MemoryStorage {
    async fn initialize(&self, source: SourceId, first_value: u64) -> StorageResult<()> {
        self.sequences
            .entry(source)
            .or_insert_with(|| SequenceState::new(source, first_value));
        Ok(())
    }

    async fn load(&self, source: SourceId) -> StorageResult<Option<SequenceState>> {
        Ok(self.sequences.get(&source).map(|s| s.clone()))
    }

    async fn compare_and_swap(
        &self,
        source: SourceId,
        expected_version: u64,
        next_value: u64,
    ) -> StorageResult<bool> {
        let mut state = self
            .sequences
            .get_mut(&source)
            .ok_or_else(|| StorageError::NotFound(format!("Sequence '{source}' not found")))?;
        Ok(state.compare_and_swap(expected_version, next_value))
    }
}

#[async_trait]
impl PoolStorage for MemoryStorage {
    async fn add_identifiers(&self, source: SourceId, values: &[String]) -> StorageResult<usize> {
        Ok(self
            .pools
            .entry(source)
            .or_insert_with(|| PoolState::new(source))
            .add(values))
    }

    async fn reserve(
        &self,
        token: ReservationToken,
        expires_at: DateTime<Utc>,
        order: AllocationOrder,
    ) -> StorageResult<Option<String>> {
        Ok(self
            .pools
            .get_mut(&token.source)
            .and_then(|mut pool| pool.reserve(token.reservation, expires_at, order)))
    }

    async fn commit(
        &self,
        token: ReservationToken,
        now: DateTime<Utc>,
    ) -> StorageResult<ReservationOutcome> {
        Ok(self
            .pools
            .get_mut(&token.source)
            .map_or(ReservationOutcome::Unknown, |mut pool| {
                pool.commit(token.reservation, now)
            }))
    }

    async fn release(&self, token: ReservationToken) -> StorageResult<ReservationOutcome> {
        Ok(self
            .pools
            .get_mut(&token.source)
            .map_or(ReservationOutcome::Unknown, |mut pool| {
                pool.release(token.reservation)
            }))
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        Ok(self
            .pools
            .iter_mut()
            .map(|mut pool| pool.release_expired(now))
            .sum())
    }

    async fn counts(&self, source: SourceId) -> StorageResult<PoolCounts> {
        Ok(self
            .pools
            .get(&source)
            .map(|pool| pool.counts())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ConfigStorage for MemoryStorage {
    async fn create_identifier_type(&self, identifier_type: &IdentifierType) -> StorageResult<()> {
        let _guard = self.type_names.lock();
        let taken = self
            .types
            .iter()
            .any(|t| !t.retired && t.name.eq_ignore_ascii_case(&identifier_type.name));
        if taken {
            return Err(StorageError::Conflict(format!(
                "identifier type '{}' already exists",
                identifier_type.name
            )));
        }
        self.types.insert(identifier_type.id, identifier_type.clone());
        Ok(())
    }

    async fn save_identifier_type(&self, identifier_type: &IdentifierType) -> StorageResult<()> {
        self.types
            .insert(identifier_type.id, identifier_type.clone());
        Ok(())
    }

    async fn get_identifier_type(
        &self,
        id: IdentifierTypeId,
    ) -> StorageResult<Option<IdentifierType>> {
        Ok(self.types.get(&id).map(|t| t.clone()))
    }

    async fn list_identifier_types(&self) -> StorageResult<Vec<IdentifierType>> {
        let mut types: Vec<_> = self.types.iter().map(|t| t.clone()).collect();
        types.sort_by_key(|t| t.created_at);
        Ok(types)
    }

    async fn save_source(&self, source: &IdentifierSource) -> StorageResult<()> {
        self.sources.insert(source.id, source.clone());
        Ok(())
    }

    async fn get_source(&self, id: SourceId) -> StorageResult<Option<IdentifierSource>> {
        Ok(self.sources.get(&id).map(|s| s.clone()))
    }

    async fn list_sources(&self) -> StorageResult<Vec<IdentifierSource>> {
        let mut sources: Vec<_> = self.sources.iter().map(|s| s.clone()).collect();
        sources.sort_by_key(|s| s.created_at);
        Ok(sources)
    }

    async fn save_policy(&self, policy: &AutoGenerationPolicy) -> StorageResult<()> {
        let mut policies = self.policies.write();
        let duplicate = policies.values().any(|p| {
            p.id != policy.id
                && p.identifier_type == policy.identifier_type
                && p.location == policy.location
        });
        if duplicate {
            return Err(StorageError::Conflict(format!(
                "policy for type {} already exists at this scope",
                policy.identifier_type
            )));
        }
        policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn find_policy(
        &self,
        identifier_type: IdentifierTypeId,
        location: Option<&LocationId>,
    ) -> StorageResult<Option<AutoGenerationPolicy>> {
        Ok(self
            .policies
            .read()
            .values()
            .find(|p| p.identifier_type == identifier_type && p.location.as_ref() == location)
            .cloned())
    }

    async fn list_policies(&self) -> StorageResult<Vec<AutoGenerationPolicy>> {
        let mut policies: Vec<_> = self.policies.read().values().cloned().collect();
        policies.sort_by_key(|p| p.updated_at);
        Ok(policies)
    }

    async fn delete_policy(&self, id: PolicyId) -> StorageResult<bool> {
        Ok(self.policies.write().remove(&id).is_some())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
