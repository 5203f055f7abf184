//! Storage backend factory.
//!
//! Creates the appropriate storage backend based on configuration.

use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::IdGenError;
use crate::storage::file::FileStorage;
use crate::storage::memory::MemoryStorage;
use crate::storage::postgres::PostgresStorage;
use crate::storage::traits::Storage;

/// Create a storage backend based on configuration.
///
/// # Errors
///
/// Returns an error if the storage backend cannot be initialized or fails its health check.
pub async fn create_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>, IdGenError> {
    let storage: Arc<dyn Storage> = match config.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; counters and pools are lost on restart");
            Arc::new(MemoryStorage::new())
        }
        StorageBackend::File => Arc::new(FileStorage::new(&config.file)?),
        StorageBackend::PostgreSQL => Arc::new(PostgresStorage::connect(&config.postgresql).await?),
    };

    // Verify storage is healthy
    storage.health_check().await?;

    Ok(storage)
}
