//! Sequential allocation.
//!
//! The durable counter is the only source of truth. Every value is covered by
//! a successful compare-and-swap before it is returned, so a crash after the
//! advance loses at most a gap and never repeats a value.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::domain::{SequenceRange, SequentialSource, SourceId};
use crate::error::{IdGenError, Result};
use crate::service::cache::BlockCache;
use crate::service::context::CallContext;
use crate::service::retry::{RetryPolicy, RetryStop};
use crate::storage::traits::Storage;

/// Hands out unique, increasing sequence numbers per sequential source.
pub struct SequenceAllocator {
    storage: Arc<dyn Storage>,
    retry: RetryPolicy,
    block_size: u32,
    blocks: BlockCache,
    source_locks: DashMap<SourceId, Arc<Mutex<()>>>,
}

impl SequenceAllocator {
    /// Create an allocator.
    ///
    /// With `block_size > 1`, each durable advance reserves a contiguous block
    /// and serves the rest from memory. Numbers of a block abandoned by a
    /// restart are never reissued.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, retry: RetryPolicy, block_size: u32) -> Self {
        Self {
            storage,
            retry,
            block_size: block_size.max(1),
            blocks: BlockCache::new(),
            source_locks: DashMap::new(),
        }
    }

    /// Allocate the next sequence number of a source, never above `capacity`.
    ///
    /// # Errors
    ///
    /// - `CapacityExhausted` if the counter has passed `capacity`
    /// - `AllocationTimeout` if contention outlasts the retry budget
    /// - `Cancelled` if `ctx` ends first
    pub async fn next_value(&self, ctx: &CallContext, source: SourceId, capacity: u64) -> Result<u64> {
        if let Some(value) = self.blocks.next(source) {
            return Ok(value);
        }

        // Callers in this process take turns; CAS only arbitrates between processes.
        let lock = Arc::clone(
            self.source_locks
                .entry(source)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let _guard = ctx.run(lock.lock_owned()).await?;

        // Another caller may have refilled while we waited.
        if let Some(value) = self.blocks.next(source) {
            return Ok(value);
        }

        let range = self
            .advance(ctx, source, u64::from(self.block_size), capacity)
            .await?;
        if range.end > range.start {
            self.blocks
                .put(source, SequenceRange::new(range.start + 1, range.end));
        }
        Ok(range.start)
    }

    /// Allocate and encode the next identifier body of a sequential source.
    ///
    /// Values listed in `reserved_identifiers` are skipped; their sequence
    /// numbers become gaps.
    ///
    /// # Errors
    ///
    /// Same as [`Self::next_value`], plus `InvalidConfig` for a malformed format.
    pub async fn next_identifier(
        &self,
        ctx: &CallContext,
        source: SourceId,
        config: &SequentialSource,
    ) -> Result<(u64, String)> {
        let format = config.format()?;
        let capacity = format.capacity();

        loop {
            let sequence = self.next_value(ctx, source, capacity).await?;
            let value = format.encode(sequence)?;
            if config.reserved_identifiers.contains(&value) {
                tracing::debug!(source_id = %source, sequence, value = %value, "Skipping reserved identifier");
                continue;
            }
            return Ok((sequence, value));
        }
    }

    /// Forget any cached block of a source.
    pub fn evict(&self, source: SourceId) {
        self.blocks.remove(source);
        self.source_locks.remove(&source);
    }

    /// Durably advance the counter by up to `count` values and return them.
    async fn advance(
        &self,
        ctx: &CallContext,
        source: SourceId,
        count: u64,
        capacity: u64,
    ) -> Result<SequenceRange> {
        // Keep `end + 1` representable.
        let capacity = capacity.min(u64::MAX - 1);
        let mut backoff = self.retry.start();

        loop {
            ctx.check()?;

            let state = ctx
                .run(self.storage.load(source))
                .await??
                .ok_or_else(|| IdGenError::NotFound(format!("sequence for source {source}")))?;

            if state.next_value > capacity {
                return Err(IdGenError::CapacityExhausted(format!(
                    "source {source} has issued every value up to {capacity}"
                )));
            }

            let end = state
                .next_value
                .saturating_add(count.saturating_sub(1))
                .min(capacity);

            let swapped = ctx
                .run(self.storage.compare_and_swap(source, state.version, end + 1))
                .await??;
            if swapped {
                tracing::trace!(source_id = %source, start = state.next_value, end, "Sequence advanced");
                return Ok(SequenceRange::new(state.next_value, end));
            }

            metrics::counter!("idgen_allocation_conflicts_total").increment(1);
            tracing::debug!(
                source_id = %source,
                attempt = backoff.attempts() + 1,
                version = state.version,
                "Sequence advance conflicted, retrying"
            );

            match backoff.wait(ctx).await {
                Ok(()) => {}
                Err(RetryStop::Exhausted { attempts }) => {
                    tracing::warn!(source_id = %source, attempts, "Sequence allocation timed out");
                    return Err(IdGenError::AllocationTimeout {
                        source_id: source,
                        attempts,
                    });
                }
                Err(RetryStop::Cancelled) => return Err(IdGenError::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashSet};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use crate::domain::{
        Alphabet, AllocationOrder, AutoGenerationPolicy, IdentifierSource, IdentifierType,
        IdentifierTypeId, LocationId, PolicyId, PoolCounts, ReservationOutcome, ReservationToken,
        SequenceState,
    };
    use crate::error::StorageResult;
    use crate::storage::MemoryStorage;
    use crate::storage::traits::{ConfigStorage, PoolStorage, SequenceStorage};

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5))
    }

    async fn allocator(block_size: u32, first: u64) -> (SequenceAllocator, SourceId) {
        let storage = Arc::new(MemoryStorage::new());
        let source = SourceId::new();
        storage.initialize(source, first).await.unwrap();
        (
            SequenceAllocator::new(storage, fast_retry(50), block_size),
            source,
        )
    }

    fn mrn_source() -> SequentialSource {
        SequentialSource {
            prefix: "MRN-".to_string(),
            suffix: String::new(),
            base_character_set: Alphabet::decimal(),
            min_length: 8,
            max_length: 8,
            first_identifier_base: 1,
            reserved_identifiers: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn test_first_identifiers() {
        let (allocator, source) = allocator(1, 1).await;
        let ctx = CallContext::background();
        let config = mrn_source();

        let (n, first) = allocator.next_identifier(&ctx, source, &config).await.unwrap();
        assert_eq!((n, first.as_str()), (1, "MRN-0001"));
        let (_, second) = allocator.next_identifier(&ctx, source, &config).await.unwrap();
        assert_eq!(second, "MRN-0002");
    }

    #[tokio::test]
    async fn test_reserved_identifiers_skipped() {
        let (allocator, source) = allocator(1, 1).await;
        let ctx = CallContext::background();
        let mut config = mrn_source();
        config.reserved_identifiers.insert("MRN-0002".to_string());

        let (_, first) = allocator.next_identifier(&ctx, source, &config).await.unwrap();
        let (n, second) = allocator.next_identifier(&ctx, source, &config).await.unwrap();
        assert_eq!(first, "MRN-0001");
        assert_eq!((n, second.as_str()), (3, "MRN-0003"));
    }

    #[tokio::test]
    async fn test_concurrent_values_unique() {
        for block_size in [1, 16] {
            let (allocator, source) = allocator(block_size, 0).await;
            let allocator = Arc::new(allocator);

            let handles: Vec<_> = (0..64)
                .map(|_| {
                    let allocator = Arc::clone(&allocator);
                    tokio::spawn(async move {
                        allocator
                            .next_value(&CallContext::background(), source, u64::MAX)
                            .await
                            .unwrap()
                    })
                })
                .collect();

            let mut seen = HashSet::new();
            for handle in handles {
                assert!(seen.insert(handle.await.unwrap()));
            }
            assert_eq!(seen.len(), 64);
        }
    }

    #[tokio::test]
    async fn test_sequential_calls_increase() {
        let (allocator, source) = allocator(4, 10).await;
        let ctx = CallContext::background();

        let mut last = None;
        for _ in 0..10 {
            let value = allocator.next_value(&ctx, source, u64::MAX).await.unwrap();
            assert!(last.is_none_or(|l| value > l));
            last = Some(value);
        }
    }

    #[tokio::test]
    async fn test_capacity_exhausted_without_advance() {
        let (allocator, source) = allocator(1, 9).await;
        let ctx = CallContext::background();

        assert_eq!(allocator.next_value(&ctx, source, 9).await.unwrap(), 9);
        assert!(matches!(
            allocator.next_value(&ctx, source, 9).await,
            Err(IdGenError::CapacityExhausted(_))
        ));
        let state = allocator.storage.load(source).await.unwrap().unwrap();
        assert_eq!(state.next_value, 10);
    }

    #[tokio::test]
    async fn test_block_clamped_to_capacity() {
        let (allocator, source) = allocator(100, 0).await;
        let ctx = CallContext::background();

        for expected in 0..=4 {
            assert_eq!(allocator.next_value(&ctx, source, 4).await.unwrap(), expected);
        }
        assert!(matches!(
            allocator.next_value(&ctx, source, 4).await,
            Err(IdGenError::CapacityExhausted(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let (allocator, _) = allocator(1, 0).await;
        let result = allocator
            .next_value(&CallContext::background(), SourceId::new(), u64::MAX)
            .await;
        assert!(matches!(result, Err(IdGenError::NotFound(_))));
    }

    /// Storage whose compare-and-swap always loses.
    struct Contended(MemoryStorage);

    #[async_trait]
    impl SequenceStorage for Contended {
        async fn initialize(&self, source: SourceId, first_value: u64) -> StorageResult<()> {
            self.0.initialize(source, first_value).await
        }

        async fn load(&self, source: SourceId) -> StorageResult<Option<SequenceState>> {
            self.0.load(source).await
        }

        async fn compare_and_swap(&self, _: SourceId, _: u64, _: u64) -> StorageResult<bool> {
            Ok(false)
        }
    }

    #[async_trait]
    impl PoolStorage for Contended {
        async fn add_identifiers(&self, source: SourceId, values: &[String]) -> StorageResult<usize> {
            self.0.add_identifiers(source, values).await
        }

        async fn reserve(
            &self,
            token: ReservationToken,
            expires_at: DateTime<Utc>,
            order: AllocationOrder,
        ) -> StorageResult<Option<String>> {
            self.0.reserve(token, expires_at, order).await
        }

        async fn commit(
            &self,
            token: ReservationToken,
            now: DateTime<Utc>,
        ) -> StorageResult<ReservationOutcome> {
            self.0.commit(token, now).await
        }

        async fn release(&self, token: ReservationToken) -> StorageResult<ReservationOutcome> {
            self.0.release(token).await
        }

        async fn release_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
            self.0.release_expired(now).await
        }

        async fn counts(&self, source: SourceId) -> StorageResult<PoolCounts> {
            self.0.counts(source).await
        }
    }

    #[async_trait]
    impl ConfigStorage for Contended {
        async fn create_identifier_type(&self, t: &IdentifierType) -> StorageResult<()> {
            self.0.create_identifier_type(t).await
        }

        async fn save_identifier_type(&self, t: &IdentifierType) -> StorageResult<()> {
            self.0.save_identifier_type(t).await
        }

        async fn get_identifier_type(
            &self,
            id: IdentifierTypeId,
        ) -> StorageResult<Option<IdentifierType>> {
            self.0.get_identifier_type(id).await
        }

        async fn list_identifier_types(&self) -> StorageResult<Vec<IdentifierType>> {
            self.0.list_identifier_types().await
        }

        async fn save_source(&self, source: &IdentifierSource) -> StorageResult<()> {
            self.0.save_source(source).await
        }

        async fn get_source(&self, id: SourceId) -> StorageResult<Option<IdentifierSource>> {
            self.0.get_source(id).await
        }

        async fn list_sources(&self) -> StorageResult<Vec<IdentifierSource>> {
            self.0.list_sources().await
        }

        async fn save_policy(&self, policy: &AutoGenerationPolicy) -> StorageResult<()> {
            self.0.save_policy(policy).await
        }

        async fn find_policy(
            &self,
            identifier_type: IdentifierTypeId,
            location: Option<&LocationId>,
        ) -> StorageResult<Option<AutoGenerationPolicy>> {
            self.0.find_policy(identifier_type, location).await
        }

        async fn list_policies(&self) -> StorageResult<Vec<AutoGenerationPolicy>> {
            self.0.list_policies().await
        }

        async fn delete_policy(&self, id: PolicyId) -> StorageResult<bool> {
            self.0.delete_policy(id).await
        }
    }

    #[async_trait]
    impl Storage for Contended {
        async fn health_check(&self) -> StorageResult<()> {
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "contended"
        }
    }

    #[tokio::test]
    async fn test_contention_times_out() {
        let storage = Arc::new(Contended(MemoryStorage::new()));
        let source = SourceId::new();
        storage.initialize(source, 0).await.unwrap();
        let allocator = SequenceAllocator::new(storage, fast_retry(3), 1);

        let result = allocator
            .next_value(&CallContext::background(), source, u64::MAX)
            .await;
        assert!(matches!(
            result,
            Err(IdGenError::AllocationTimeout { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_while_contended() {
        let storage = Arc::new(Contended(MemoryStorage::new()));
        let source = SourceId::new();
        storage.initialize(source, 0).await.unwrap();
        let allocator = SequenceAllocator::new(
            storage,
            RetryPolicy::new(100, Duration::from_secs(5), Duration::from_secs(5)),
            1,
        );

        let ctx = CallContext::background().with_timeout(Duration::from_millis(50));
        let result = allocator.next_value(&ctx, source, u64::MAX).await;
        assert!(matches!(result, Err(IdGenError::Cancelled)));
    }
}
