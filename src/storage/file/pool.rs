//! File-based pool storage.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::lock::{self, KeyedMutex};
use crate::domain::{
    AllocationOrder, PoolCounts, PoolState, ReservationOutcome, ReservationToken, SourceId,
};
use crate::error::StorageResult;
use crate::storage::traits::PoolStorage;

/// File-based pool storage implementation.
///
/// One `{source}.json` document holds every entry of a pool.
pub struct FilePoolStorage {
    pools_dir: PathBuf,
    locks: KeyedMutex,
}

impl FilePoolStorage {
    /// Create a new file pool storage.
    pub fn new(pools_dir: PathBuf) -> Self {
        Self {
            pools_dir,
            locks: KeyedMutex::default(),
        }
    }

    fn pool_path(&self, source: SourceId) -> PathBuf {
        self.pools_dir.join(format!("{source}.json"))
    }

    /// Apply `f` to one pool under its lock, writing it back when `f` reports a change.
    ///
    /// An unreadable pool document fails the call; it is never replaced by an empty pool.
    async fn with_pool<R, F>(&self, source: SourceId, f: F) -> StorageResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut PoolState) -> (R, bool) + Send + 'static,
    {
        let _guard = self.locks.lock(&source.to_string()).await;

        lock::update(self.pool_path(source), move |doc: &mut Option<PoolState>| {
            let pool = doc.get_or_insert_with(|| PoolState::new(source));
            Ok(f(pool))
        })
        .await
    }

    fn pool_sources(&self) -> StorageResult<Vec<SourceId>> {
        if !self.pools_dir.exists() {
            return Ok(Vec::new());
        }

        let mut sources = Vec::new();
        for entry in std::fs::read_dir(&self.pools_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()).map(str::parse) {
                Some(Ok(source)) => sources.push(source),
                _ => tracing::warn!(path = ?path, "Skipping unrecognized pool file"),
            }
        }
        Ok(sources)
    }
}

#[async_trait]
impl PoolStorage for FilePoolStorage {
    async fn add_identifiers(&self, source: SourceId, values: &[String]) -> StorageResult<usize> {
        let values = values.to_vec();
        self.with_pool(source, move |pool| {
            let added = pool.add(&values);
            (added, true)
        })
        .await
    }

    async fn reserve(
        &self,
        token: ReservationToken,
        expires_at: DateTime<Utc>,
        order: AllocationOrder,
    ) -> StorageResult<Option<String>> {
        self.with_pool(token.source, move |pool| {
            let reserved = pool.reserve(token.reservation, expires_at, order);
            let changed = reserved.is_some();
            (reserved, changed)
        })
        .await
    }

    async fn commit(
        &self,
        token: ReservationToken,
        now: DateTime<Utc>,
    ) -> StorageResult<ReservationOutcome> {
        self.with_pool(token.source, move |pool| {
            let outcome = pool.commit(token.reservation, now);
            let changed = outcome != ReservationOutcome::Unknown;
            (outcome, changed)
        })
        .await
    }

    async fn release(&self, token: ReservationToken) -> StorageResult<ReservationOutcome> {
        self.with_pool(token.source, move |pool| {
            let outcome = pool.release(token.reservation);
            let changed = outcome != ReservationOutcome::Unknown;
            (outcome, changed)
        })
        .await
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let mut released = 0;
        for source in self.pool_sources()? {
            let swept = self
                .with_pool(source, move |pool| {
                    let count = pool.release_expired(now);
                    (count, count > 0)
                })
                .await;
            match swept {
                Ok(count) => released += count,
                Err(e) => tracing::error!(source_id = %source, error = %e, "Skipping unreadable pool"),
            }
        }
        Ok(released)
    }

    async fn counts(&self, source: SourceId) -> StorageResult<PoolCounts> {
        let pool: Option<PoolState> = lock::read(self.pool_path(source)).await?;
        Ok(pool.map(|p| p.counts()).unwrap_or_default())
    }
}
