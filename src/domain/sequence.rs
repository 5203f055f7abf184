//! Sequence state and range types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SourceId;

/// An inclusive range of sequence numbers handed out by one durable advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRange {
    /// First value in the range (inclusive).
    pub start: u64,
    /// Last value in the range (inclusive).
    pub end: u64,
}

impl SequenceRange {
    /// Create a new sequence range.
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Get the number of values in this range.
    #[must_use]
    pub const fn count(&self) -> u64 {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    /// Check if the range is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Iterate over values in the range.
    pub fn iter(&self) -> impl Iterator<Item = u64> {
        self.start..=self.end
    }
}

/// Persistent counter of a sequential source.
///
/// `next_value` is the first number not yet handed out. `version` increases
/// on every successful advance and is the compare-and-swap token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceState {
    /// Owning source.
    pub source: SourceId,

    /// Next value to be allocated.
    pub next_value: u64,

    /// Version for optimistic locking.
    pub version: u64,

    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl SequenceState {
    /// Create a new sequence state.
    #[must_use]
    pub fn new(source: SourceId, first_value: u64) -> Self {
        Self {
            source,
            next_value: first_value,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Apply a compare-and-swap. Returns `false` without changes on version mismatch.
    pub fn compare_and_swap(&mut self, expected_version: u64, next_value: u64) -> bool {
        if self.version != expected_version {
            return false;
        }
        self.next_value = next_value;
        self.version += 1;
        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_range_count() {
        assert_eq!(SequenceRange::new(1, 10).count(), 10);
        assert_eq!(SequenceRange::new(1, 1).count(), 1);
        assert!(SequenceRange::new(2, 1).is_empty());
    }

    #[test]
    fn test_sequence_range_iter() {
        let values: Vec<u64> = SequenceRange::new(3, 6).iter().collect();
        assert_eq!(values, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_compare_and_swap() {
        let mut state = SequenceState::new(SourceId::new(), 1);
        assert!(state.compare_and_swap(0, 2));
        assert_eq!(state.version, 1);
        assert!(!state.compare_and_swap(0, 3));
        assert_eq!(state.next_value, 2);
    }
}
