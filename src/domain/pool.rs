//! Pool entries and their reservation lifecycle.
//!
//! Every identifier in a pool is in exactly one of `available`, `reserved`
//! or `used`. Entries move `available -> reserved -> used`, or back from
//! `reserved` to `available` on release or expiry. `used` is final.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AllocationOrder, SourceId};

/// Handle for a pending pool reservation.
///
/// Rendered as `{source}:{reservation}` so it can be resolved without any
/// in-memory index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReservationToken {
    /// Pool source that holds the entry.
    pub source: SourceId,
    /// Reservation id stored on the entry.
    pub reservation: Uuid,
}

impl ReservationToken {
    /// Create a fresh token for a source.
    #[must_use]
    pub fn new(source: SourceId) -> Self {
        Self {
            source,
            reservation: Uuid::new_v4(),
        }
    }
}

impl fmt::Display for ReservationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.reservation)
    }
}

/// Error parsing a reservation token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed reservation token: {0}")]
pub struct TokenParseError(String);

impl FromStr for ReservationToken {
    type Err = TokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, reservation) = s
            .split_once(':')
            .ok_or_else(|| TokenParseError(s.to_string()))?;
        Ok(Self {
            source: source.parse().map_err(|_| TokenParseError(s.to_string()))?,
            reservation: reservation
                .parse()
                .map_err(|_| TokenParseError(s.to_string()))?,
        })
    }
}

impl TryFrom<String> for ReservationToken {
    type Error = TokenParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReservationToken> for String {
    fn from(value: ReservationToken) -> Self {
        value.to_string()
    }
}

/// State of one pool entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum PoolEntryState {
    /// Free to reserve.
    Available,
    /// Held by a pending reservation.
    Reserved {
        /// Reservation id.
        reservation: Uuid,
        /// When the reservation lapses.
        expires_at: DateTime<Utc>,
    },
    /// Permanently issued.
    Used {
        /// Commit time.
        used_at: DateTime<Utc>,
    },
}

/// One identifier in a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEntry {
    /// The identifier value.
    pub identifier: String,
    /// Lifecycle state.
    #[serde(flatten)]
    pub state: PoolEntryState,
}

/// Entry counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCounts {
    /// Available entries.
    pub available: u64,
    /// Reserved entries.
    pub reserved: u64,
    /// Used entries.
    pub used: u64,
}

impl PoolCounts {
    /// Total number of entries.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.available + self.reserved + self.used
    }
}

/// Outcome of resolving a reservation on commit or release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// The reservation was found and applied; carries the identifier.
    Applied(String),
    /// The reservation had lapsed; the entry was returned to the pool.
    Expired,
    /// No entry carries this reservation.
    Unknown,
}

/// Full contents of one pool, kept in load order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    /// Owning source.
    pub source: SourceId,
    /// Entries in load order.
    pub entries: Vec<PoolEntry>,
}

impl PoolState {
    /// Create an empty pool.
    #[must_use]
    pub const fn new(source: SourceId) -> Self {
        Self {
            source,
            entries: Vec::new(),
        }
    }

    /// Append identifiers as available, skipping ones already present.
    ///
    /// Returns the number of entries added.
    pub fn add(&mut self, values: &[String]) -> usize {
        let mut known: HashSet<String> =
            self.entries.iter().map(|e| e.identifier.clone()).collect();
        let before = self.entries.len();

        for value in values {
            let value = value.trim();
            if value.is_empty() || !known.insert(value.to_string()) {
                continue;
            }
            self.entries.push(PoolEntry {
                identifier: value.to_string(),
                state: PoolEntryState::Available,
            });
        }

        self.entries.len() - before
    }

    /// Reserve one available entry.
    ///
    /// Returns `None` when the pool has no available entries.
    pub fn reserve(
        &mut self,
        reservation: Uuid,
        expires_at: DateTime<Utc>,
        order: AllocationOrder,
    ) -> Option<String> {
        let mut available = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.state == PoolEntryState::Available)
            .map(|(i, _)| i);

        let index = match order {
            AllocationOrder::Sequential => available.next(),
            AllocationOrder::Random => available.choose(&mut rand::rng()),
        }?;

        let entry = &mut self.entries[index];
        entry.state = PoolEntryState::Reserved {
            reservation,
            expires_at,
        };
        Some(entry.identifier.clone())
    }

    /// Mark a reserved entry as used.
    pub fn commit(&mut self, reservation: Uuid, now: DateTime<Utc>) -> ReservationOutcome {
        let Some(entry) = self.find_reserved(reservation) else {
            return ReservationOutcome::Unknown;
        };

        if matches!(entry.state, PoolEntryState::Reserved { expires_at, .. } if expires_at <= now)
        {
            entry.state = PoolEntryState::Available;
            return ReservationOutcome::Expired;
        }

        entry.state = PoolEntryState::Used { used_at: now };
        ReservationOutcome::Applied(entry.identifier.clone())
    }

    /// Return a reserved entry to the pool.
    pub fn release(&mut self, reservation: Uuid) -> ReservationOutcome {
        match self.find_reserved(reservation) {
            Some(entry) => {
                entry.state = PoolEntryState::Available;
                ReservationOutcome::Applied(entry.identifier.clone())
            }
            None => ReservationOutcome::Unknown,
        }
    }

    /// Release every reservation whose expiry is at or before `now`.
    ///
    /// Returns the number of entries released.
    pub fn release_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut released = 0;
        for entry in &mut self.entries {
            if matches!(entry.state, PoolEntryState::Reserved { expires_at, .. } if expires_at <= now)
            {
                entry.state = PoolEntryState::Available;
                released += 1;
            }
        }
        released
    }

    /// Count entries per state.
    #[must_use]
    pub fn counts(&self) -> PoolCounts {
        let mut counts = PoolCounts::default();
        for entry in &self.entries {
            match entry.state {
                PoolEntryState::Available => counts.available += 1,
                PoolEntryState::Reserved { .. } => counts.reserved += 1,
                PoolEntryState::Used { .. } => counts.used += 1,
            }
        }
        counts
    }

    fn find_reserved(&mut self, reservation: Uuid) -> Option<&mut PoolEntry> {
        self.entries.iter_mut().find(|e| {
            matches!(e.state, PoolEntryState::Reserved { reservation: r, .. } if r == reservation)
        })
    }
}
