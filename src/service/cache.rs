//! Sequence block caching.
//!
//! Holds the unissued remainder of contiguous blocks reserved from durable
//! counters, so most allocations skip storage I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::domain::{SequenceRange, SourceId};

/// Cached block for a single source.
pub struct CachedBlock {
    /// Next value to hand out (atomically incremented).
    current: AtomicU64,
    /// Last value in the block (inclusive).
    end: u64,
}

impl CachedBlock {
    /// Create a new cached block from a range.
    #[must_use]
    pub const fn from_range(range: SequenceRange) -> Self {
        Self {
            current: AtomicU64::new(range.start),
            end: range.end,
        }
    }

    /// Try to get the next value from the block.
    ///
    /// Returns `None` if the block is exhausted.
    pub fn next(&self) -> Option<u64> {
        loop {
            let current = self.current.load(Ordering::SeqCst);

            if current > self.end {
                return None;
            }

            if self
                .current
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(current);
            }
            // CAS failed, retry
        }
    }
}

/// Per-source block cache.
#[derive(Default)]
pub struct BlockCache {
    /// Cached blocks by source.
    blocks: RwLock<HashMap<SourceId, CachedBlock>>,
}

impl BlockCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next cached value of a source, if any.
    pub fn next(&self, source: SourceId) -> Option<u64> {
        self.blocks.read().get(&source).and_then(CachedBlock::next)
    }

    /// Replace the cached block of a source. Empty ranges clear it.
    pub fn put(&self, source: SourceId, range: SequenceRange) {
        let mut blocks = self.blocks.write();
        if range.is_empty() {
            blocks.remove(&source);
        } else {
            blocks.insert(source, CachedBlock::from_range(range));
        }
    }

    /// Drop the cached block of a source. Its values are never reissued.
    pub fn remove(&self, source: SourceId) {
        self.blocks.write().remove(&source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_block_next() {
        let cached = CachedBlock::from_range(SequenceRange::new(1, 3));

        assert_eq!(cached.next(), Some(1));
        assert_eq!(cached.next(), Some(2));
        assert_eq!(cached.next(), Some(3));
        assert_eq!(cached.next(), None);
        assert_eq!(cached.next(), None);
    }

    #[test]
    fn test_block_cache_per_source() {
        let cache = BlockCache::new();
        let a = SourceId::new();
        let b = SourceId::new();

        assert_eq!(cache.next(a), None);

        cache.put(a, SequenceRange::new(10, 11));
        cache.put(b, SequenceRange::new(100, 100));

        assert_eq!(cache.next(a), Some(10));
        assert_eq!(cache.next(b), Some(100));
        assert_eq!(cache.next(b), None);

        cache.remove(a);
        assert_eq!(cache.next(a), None);
    }

    #[test]
    fn test_empty_range_clears() {
        let cache = BlockCache::new();
        let source = SourceId::new();
        cache.put(source, SequenceRange::new(1, 5));
        cache.put(source, SequenceRange::new(6, 5));
        assert_eq!(cache.next(source), None);
    }

    #[test]
    fn test_concurrent_block_values_unique() {
        let cached = std::sync::Arc::new(CachedBlock::from_range(SequenceRange::new(0, 999)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cached = std::sync::Arc::clone(&cached);
                std::thread::spawn(move || std::iter::from_fn(|| cached.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
    }
}
