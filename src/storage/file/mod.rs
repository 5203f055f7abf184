//! File-based storage backend.
//!
//! This backend stores data as JSON files with file locking for atomic operations.
//! Suitable for development and single-node deployments.
//!
//! Directory structure:
//! ```text
//! data/
//! ├── sequences/
//! │   └── {source}.json
//! ├── pools/
//! │   └── {source}.json
//! └── configs/
//!     ├── types/
//!     │   └── {id}.json
//!     ├── sources/
//!     │   └── {id}.json
//!     └── policies/
//!         └── {id}.json
//! ```

mod config;
mod lock;
mod pool;
mod sequence;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::FileStorageConfig;
use crate::domain::{
    AllocationOrder, AutoGenerationPolicy, IdentifierSource, IdentifierType, IdentifierTypeId,
    LocationId, PolicyId, PoolCounts, ReservationOutcome, ReservationToken, SequenceState,
    SourceId,
};
use crate::error::{StorageError, StorageResult};
use crate::storage::traits::{ConfigStorage, PoolStorage, SequenceStorage, Storage};

pub use config::FileConfigStorage;
pub use pool::FilePoolStorage;
pub use sequence::FileSequenceStorage;

/// File-based storage implementation.
pub struct FileStorage {
    /// Base data directory.
    base_dir: PathBuf,
    /// Sequence storage.
    sequence_storage: FileSequenceStorage,
    /// Pool storage.
    pool_storage: FilePoolStorage,
    /// Config storage.
    config_storage: FileConfigStorage,
}

impl FileStorage {
    /// Create a new file storage instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directories cannot be created.
    pub fn new(config: &FileStorageConfig) -> StorageResult<Self> {
        let base_dir = config.data_dir.clone();

        // Create directory structure
        Self::ensure_directories(&base_dir)?;

        Ok(Self {
            sequence_storage: FileSequenceStorage::new(base_dir.join("sequences")),
            pool_storage: FilePoolStorage::new(base_dir.join("pools")),
            config_storage: FileConfigStorage::new(base_dir.join("configs")),
            base_dir,
        })
    }

    /// Ensure all required directories exist.
    fn ensure_directories(base_dir: &Path) -> StorageResult<()> {
        let dirs = [
            base_dir.to_path_buf(),
            base_dir.join("sequences"),
            base_dir.join("pools"),
            base_dir.join("configs/types"),
            base_dir.join("configs/sources"),
            base_dir.join("configs/policies"),
        ];

        for dir in &dirs {
            std::fs::create_dir_all(dir).map_err(|e| {
                StorageError::FileIO(format!("Failed to create directory {}: {e}", dir.display()))
            })?;
        }

        Ok(())
    }
}

#[async_trait]
impl SequenceStorage for FileStorage {
    async fn initialize(&self, source: SourceId, first_value: u64) -> StorageResult<()> {
        self.sequence_storage.initialize(source, first_value).await
    }

    async fn load(&self, source: SourceId) -> StorageResult<Option<SequenceState>> {
        self.sequence_storage.load(source).await
    }

    async fn compare_and_swap(
        &self,
        source: SourceId,
        expected_version: u64,
        next_value: u64,
    ) -> StorageResult<bool> {
        self.sequence_storage
            .compare_and_swap(source, expected_version, next_value)
            .await
    }
}

#[async_trait]
impl PoolStorage for FileStorage {
    async fn add_identifiers(&self, source: SourceId, values: &[String]) -> StorageResult<usize> {
        self.pool_storage.add_identifiers(source, values).await
    }

    async fn reserve(
        &self,
        token: ReservationToken,
        expires_at: DateTime<Utc>,
        order: AllocationOrder,
    ) -> StorageResult<Option<String>> {
        self.pool_storage.reserve(token, expires_at, order).await
    }

    async fn commit(
        &self,
        token: ReservationToken,
        now: DateTime<Utc>,
    ) -> StorageResult<ReservationOutcome> {
        self.pool_storage.commit(token, now).await
    }

    async fn release(&self, token: ReservationToken) -> StorageResult<ReservationOutcome> {
        self.pool_storage.release(token).await
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        self.pool_storage.release_expired(now).await
    }

    async fn counts(&self, source: SourceId) -> StorageResult<PoolCounts> {
        self.pool_storage.counts(source).await
    }
}

#[async_trait]
impl ConfigStorage for FileStorage {
    async fn create_identifier_type(&self, identifier_type: &IdentifierType) -> StorageResult<()> {
        self.config_storage
            .create_identifier_type(identifier_type)
            .await
    }

    async fn save_identifier_type(&self, identifier_type: &IdentifierType) -> StorageResult<()> {
        self.config_storage.save_identifier_type(identifier_type).await
    }

    async fn get_identifier_type(
        &self,
        id: IdentifierTypeId,
    ) -> StorageResult<Option<IdentifierType>> {
        self.config_storage.get_identifier_type(id).await
    }

    async fn list_identifier_types(&self) -> StorageResult<Vec<IdentifierType>> {
        self.config_storage.list_identifier_types().await
    }

    async fn save_source(&self, source: &IdentifierSource) -> StorageResult<()> {
        self.config_storage.save_source(source).await
    }

    async fn get_source(&self, id: SourceId) -> StorageResult<Option<IdentifierSource>> {
        self.config_storage.get_source(id).await
    }

    async fn list_sources(&self) -> StorageResult<Vec<IdentifierSource>> {
        self.config_storage.list_sources().await
    }

    async fn save_policy(&self, policy: &AutoGenerationPolicy) -> StorageResult<()> {
        self.config_storage.save_policy(policy).await
    }

    async fn find_policy(
        &self,
        identifier_type: IdentifierTypeId,
        location: Option<&LocationId>,
    ) -> StorageResult<Option<AutoGenerationPolicy>> {
        self.config_storage
            .find_policy(identifier_type, location)
            .await
    }

    async fn list_policies(&self) -> StorageResult<Vec<AutoGenerationPolicy>> {
        self.config_storage.list_policies().await
    }

    async fn delete_policy(&self, id: PolicyId) -> StorageResult<bool> {
        self.config_storage.delete_policy(id).await
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn health_check(&self) -> StorageResult<()> {
        // Check if base directory is accessible
        if !self.base_dir.exists() {
            return Err(StorageError::Unavailable);
        }

        // Try to create a test file
        let test_file = self.base_dir.join(".health_check");
        tokio::fs::write(&test_file, b"ok")
            .await
            .map_err(|e| StorageError::FileIO(format!("Health check failed: {e}")))?;
        tokio::fs::remove_file(&test_file)
            .await
            .map_err(|e| StorageError::FileIO(format!("Health check cleanup failed: {e}")))?;

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
