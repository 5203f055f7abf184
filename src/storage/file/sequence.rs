//! File-based sequence storage.

use std::path::PathBuf;

use async_trait::async_trait;

use super::lock::{self, KeyedMutex};
use crate::domain::{SequenceState, SourceId};
use crate::error::{StorageError, StorageResult};
use crate::storage::traits::SequenceStorage;

/// File-based sequence storage implementation.
///
/// One `{source}.json` document per sequential source.
pub struct FileSequenceStorage {
    /// Directory for sequence files.
    sequences_dir: PathBuf,
    /// Per-source locks within this process.
    locks: KeyedMutex,
}

impl FileSequenceStorage {
    /// Create a new file sequence storage.
    pub fn new(sequences_dir: PathBuf) -> Self {
        Self {
            sequences_dir,
            locks: KeyedMutex::default(),
        }
    }

    /// Get the file path for a sequence.
    fn sequence_path(&self, source: SourceId) -> PathBuf {
        self.sequences_dir.join(format!("{source}.json"))
    }
}

#[async_trait]
impl SequenceStorage for FileSequenceStorage {
    async fn initialize(&self, source: SourceId, first_value: u64) -> StorageResult<()> {
        let _guard = self.locks.lock(&source.to_string()).await;

        lock::update(self.sequence_path(source), move |state: &mut Option<SequenceState>| {
            // Don't overwrite existing sequence
            if state.is_some() {
                return Ok(((), false));
            }
            *state = Some(SequenceState::new(source, first_value));
            Ok(((), true))
        })
        .await
    }

    async fn load(&self, source: SourceId) -> StorageResult<Option<SequenceState>> {
        lock::read(self.sequence_path(source)).await
    }

    async fn compare_and_swap(
        &self,
        source: SourceId,
        expected_version: u64,
        next_value: u64,
    ) -> StorageResult<bool> {
        let _guard = self.locks.lock(&source.to_string()).await;

        lock::update(self.sequence_path(source), move |state: &mut Option<SequenceState>| {
            let Some(state) = state.as_mut() else {
                return Err(StorageError::NotFound(format!("Sequence '{source}' not found")));
            };
            let swapped = state.compare_and_swap(expected_version, next_value);
            Ok((swapped, swapped))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use fs2::FileExt;
    use tempfile::TempDir;

    use crate::error::IdGenError;
    use crate::service::CallContext;

    fn create_test_storage() -> (FileSequenceStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileSequenceStorage::new(temp_dir.path().to_path_buf());
        (storage, temp_dir)
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (storage, _temp) = create_test_storage();
        let source = SourceId::new();

        storage.initialize(source, 100).await.unwrap();
        assert!(storage.compare_and_swap(source, 0, 101).await.unwrap());
        storage.initialize(source, 100).await.unwrap();

        let state = storage.load(source).await.unwrap().unwrap();
        assert_eq!(state.next_value, 101);
        assert_eq!(state.version, 1);
    }

    #[tokio::test]
    async fn test_compare_and_swap_conflict() {
        let (storage, _temp) = create_test_storage();
        let source = SourceId::new();
        storage.initialize(source, 1).await.unwrap();

        assert!(storage.compare_and_swap(source, 0, 2).await.unwrap());
        assert!(!storage.compare_and_swap(source, 0, 3).await.unwrap());

        let state = storage.load(source).await.unwrap().unwrap();
        assert_eq!(state.next_value, 2);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let source = SourceId::new();
        {
            let storage = FileSequenceStorage::new(temp_dir.path().to_path_buf());
            storage.initialize(source, 5).await.unwrap();
            assert!(storage.compare_and_swap(source, 0, 6).await.unwrap());
        }

        let storage = FileSequenceStorage::new(temp_dir.path().to_path_buf());
        let state = storage.load(source).await.unwrap().unwrap();
        assert_eq!(state.next_value, 6);
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let (storage, _temp) = create_test_storage();
        let source = SourceId::new();
        assert!(storage.load(source).await.unwrap().is_none());
        assert!(matches!(
            storage.compare_and_swap(source, 0, 1).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_deadline_fires_while_another_process_holds_the_counter() {
        let (storage, _temp) = create_test_storage();
        let source = SourceId::new();
        storage.initialize(source, 1).await.unwrap();

        let foreign = std::fs::File::create(lock::lock_path(&storage.sequence_path(source))).unwrap();
        foreign.lock_exclusive().unwrap();

        let ctx = CallContext::background().with_timeout(Duration::from_millis(100));
        let started = Instant::now();
        let result = ctx.run(storage.compare_and_swap(source, 0, 2)).await;
        assert!(matches!(result, Err(IdGenError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));

        FileExt::unlock(&foreign).unwrap();
        assert!(storage.compare_and_swap(source, 0, 2).await.unwrap());
    }
}
