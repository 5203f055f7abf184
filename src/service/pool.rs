//! Pool reservation lifecycle and the expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::{AllocationOrder, PoolCounts, ReservationOutcome, ReservationToken, SourceId};
use crate::error::{IdGenError, Result};
use crate::service::context::CallContext;
use crate::storage::traits::Storage;

/// Reserves, commits and releases pool identifiers.
pub struct PoolManager {
    storage: Arc<dyn Storage>,
    reservation_ttl: chrono::Duration,
}

impl PoolManager {
    /// Create a manager whose reservations expire after `reservation_ttl`.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, reservation_ttl: Duration) -> Self {
        Self {
            storage,
            reservation_ttl: chrono::Duration::from_std(reservation_ttl)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Reserve one available identifier.
    ///
    /// Fails fast with `PoolExhausted` instead of waiting for a release.
    ///
    /// # Errors
    ///
    /// Returns `PoolExhausted`, `Cancelled`, or a storage error.
    pub async fn reserve(
        &self,
        ctx: &CallContext,
        source: SourceId,
        order: AllocationOrder,
    ) -> Result<(String, ReservationToken)> {
        ctx.check()?;

        let token = ReservationToken::new(source);
        let expires_at = Utc::now() + self.reservation_ttl;
        let reserved = ctx
            .run(self.storage.reserve(token, expires_at, order))
            .await??;

        match reserved {
            Some(identifier) => {
                tracing::debug!(source_id = %source, identifier = %identifier, token = %token, "Pool identifier reserved");
                Ok((identifier, token))
            }
            None => {
                tracing::warn!(source_id = %source, "Pool exhausted");
                Err(IdGenError::PoolExhausted(source))
            }
        }
    }

    /// Permanently mark a reserved identifier as used.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReservation` if the token is unknown, already resolved, or expired.
    pub async fn commit(&self, token: ReservationToken) -> Result<String> {
        match self.storage.commit(token, Utc::now()).await? {
            ReservationOutcome::Applied(identifier) => {
                tracing::info!(source_id = %token.source, identifier = %identifier, "Pool identifier committed");
                Ok(identifier)
            }
            ReservationOutcome::Expired => {
                metrics::counter!("idgen_pool_reservations_expired_total").increment(1);
                Err(IdGenError::InvalidReservation(format!(
                    "reservation {token} has expired"
                )))
            }
            ReservationOutcome::Unknown => Err(IdGenError::InvalidReservation(format!(
                "reservation {token} is unknown or already resolved"
            ))),
        }
    }

    /// Return a reserved identifier to the pool.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReservation` if the token is unknown or already resolved.
    pub async fn release(&self, token: ReservationToken) -> Result<String> {
        match self.storage.release(token).await? {
            ReservationOutcome::Applied(identifier) => {
                tracing::debug!(source_id = %token.source, identifier = %identifier, "Pool identifier released");
                Ok(identifier)
            }
            ReservationOutcome::Expired | ReservationOutcome::Unknown => {
                Err(IdGenError::InvalidReservation(format!(
                    "reservation {token} is unknown or already resolved"
                )))
            }
        }
    }

    /// Release every expired reservation. Returns how many were released.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn sweep(&self) -> Result<usize> {
        let released = self.storage.release_expired(Utc::now()).await?;
        if released > 0 {
            metrics::counter!("idgen_pool_reservations_expired_total")
                .increment(u64::try_from(released).unwrap_or(u64::MAX));
            tracing::info!(released, "Released expired pool reservations");
        }
        Ok(released)
    }

    /// Load identifiers into a pool. Returns how many were new.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn add(&self, source: SourceId, identifiers: &[String]) -> Result<usize> {
        Ok(self.storage.add_identifiers(source, identifiers).await?)
    }

    /// Entry counts of a pool.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn status(&self, source: SourceId) -> Result<PoolCounts> {
        Ok(self.storage.counts(source).await?)
    }
}

/// Background task running [`PoolManager::sweep`] on an interval.
pub struct PoolSweeper;

impl PoolSweeper {
    /// Sweep every `interval` until `shutdown` is cancelled.
    pub fn spawn(
        manager: Arc<PoolManager>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        tracing::info!("Pool sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = manager.sweep().await {
                            tracing::warn!(error = %e, "Pool expiry sweep failed");
                        }
                    }
                }
            }
        })
    }
}
