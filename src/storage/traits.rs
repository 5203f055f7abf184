//! Storage trait definitions.
//!
//! These traits define the interface for storage backends, enabling swapping
//! between different implementations without changing business logic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    AllocationOrder, AutoGenerationPolicy, IdentifierSource, IdentifierType, IdentifierTypeId,
    LocationId, PolicyId, PoolCounts, ReservationOutcome, ReservationToken, SequenceState,
    SourceId,
};
use crate::error::StorageResult;

/// Durable counters of sequential sources.
///
/// Every advance is durable before the call returns, so a value handed out
/// after a successful `compare_and_swap` is never handed out again.
#[async_trait]
pub trait SequenceStorage: Send + Sync {
    /// Create the counter for a source starting at `first_value`.
    ///
    /// This is idempotent - if the counter already exists, it will not be modified.
    async fn initialize(&self, source: SourceId, first_value: u64) -> StorageResult<()>;

    /// Load the counter of a source.
    async fn load(&self, source: SourceId) -> StorageResult<Option<SequenceState>>;

    /// Set `next_value` if the stored version still equals `expected_version`.
    ///
    /// Returns `false` on a version conflict; the caller reloads and retries.
    async fn compare_and_swap(
        &self,
        source: SourceId,
        expected_version: u64,
        next_value: u64,
    ) -> StorageResult<bool>;
}

/// Durable pool entries and their reservations.
///
/// Reservation of one entry is atomic: two concurrent `reserve` calls never
/// receive the same identifier.
#[async_trait]
pub trait PoolStorage: Send + Sync {
    /// Load identifiers as available. Returns how many were new.
    async fn add_identifiers(&self, source: SourceId, values: &[String]) -> StorageResult<usize>;

    /// Reserve one available entry of `token.source` under `token`.
    ///
    /// Returns `None` when no entry is available.
    async fn reserve(
        &self,
        token: ReservationToken,
        expires_at: DateTime<Utc>,
        order: AllocationOrder,
    ) -> StorageResult<Option<String>>;

    /// Mark the reserved entry as used.
    async fn commit(
        &self,
        token: ReservationToken,
        now: DateTime<Utc>,
    ) -> StorageResult<ReservationOutcome>;

    /// Return the reserved entry to the pool.
    async fn release(&self, token: ReservationToken) -> StorageResult<ReservationOutcome>;

    /// Release every reservation, in any pool, that expired at or before `now`.
    async fn release_expired(&self, now: DateTime<Utc>) -> StorageResult<usize>;

    /// Entry counts per state.
    async fn counts(&self, source: SourceId) -> StorageResult<PoolCounts>;
}

/// Configuration storage operations.
///
/// Provides CRUD operations for identifier types, sources and policies.
#[async_trait]
pub trait ConfigStorage: Send + Sync {
    /// Insert a new identifier type.
    ///
    /// Fails with `Conflict` if a non-retired type has the same name, ignoring
    /// ASCII case. The check and the insert are atomic.
    async fn create_identifier_type(&self, identifier_type: &IdentifierType) -> StorageResult<()>;

    /// Insert or replace an identifier type.
    async fn save_identifier_type(&self, identifier_type: &IdentifierType) -> StorageResult<()>;

    /// Get an identifier type by id.
    async fn get_identifier_type(
        &self,
        id: IdentifierTypeId,
    ) -> StorageResult<Option<IdentifierType>>;

    /// List all identifier types, retired ones included.
    async fn list_identifier_types(&self) -> StorageResult<Vec<IdentifierType>>;

    /// Insert or replace a source.
    async fn save_source(&self, source: &IdentifierSource) -> StorageResult<()>;

    /// Get a source by id.
    async fn get_source(&self, id: SourceId) -> StorageResult<Option<IdentifierSource>>;

    /// List all sources, retired ones included.
    async fn list_sources(&self) -> StorageResult<Vec<IdentifierSource>>;

    /// Insert or replace a policy by id.
    async fn save_policy(&self, policy: &AutoGenerationPolicy) -> StorageResult<()>;

    /// Find the policy for an exact `(type, location)` pair; `None` location is the global one.
    async fn find_policy(
        &self,
        identifier_type: IdentifierTypeId,
        location: Option<&LocationId>,
    ) -> StorageResult<Option<AutoGenerationPolicy>>;

    /// List all policies.
    async fn list_policies(&self) -> StorageResult<Vec<AutoGenerationPolicy>>;

    /// Delete a policy.
    async fn delete_policy(&self, id: PolicyId) -> StorageResult<bool>;
}

/// Combined storage trait for all storage operations.
#[async_trait]
pub trait Storage: SequenceStorage + PoolStorage + ConfigStorage {
    /// Check if the storage backend is healthy and reachable.
    async fn health_check(&self) -> StorageResult<()>;

    /// Get the storage backend name.
    fn backend_name(&self) -> &'static str;
}

/// Trait object alias for Storage.
pub type DynStorage = dyn Storage;
