//! `PostgreSQL` storage backend.
//!
//! Counters use optimistic concurrency (`UPDATE ... WHERE version = $n`); pool
//! reservations lock one row with `FOR UPDATE SKIP LOCKED`, so concurrent
//! reservers never wait on each other. Configuration records are stored as
//! `jsonb` documents.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;

use crate::config::PostgresStorageConfig;
use crate::domain::{
    AllocationOrder, AutoGenerationPolicy, IdentifierSource, IdentifierType, IdentifierTypeId,
    LocationId, PolicyId, PoolCounts, ReservationOutcome, ReservationToken, SequenceState,
    SourceId,
};
use crate::error::{StorageError, StorageResult};
use crate::storage::traits::{ConfigStorage, PoolStorage, SequenceStorage, Storage};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS idgen_sequences (
        source_id UUID PRIMARY KEY,
        next_value BIGINT NOT NULL,
        version BIGINT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS idgen_pool_entries (
        position BIGSERIAL,
        source_id UUID NOT NULL,
        identifier TEXT NOT NULL,
        state TEXT NOT NULL,
        reservation_id UUID,
        expires_at TIMESTAMPTZ,
        used_at TIMESTAMPTZ,
        PRIMARY KEY (source_id, identifier)
    )",
    "CREATE INDEX IF NOT EXISTS idgen_pool_entries_available
        ON idgen_pool_entries (source_id, position) WHERE state = 'available'",
    "CREATE INDEX IF NOT EXISTS idgen_pool_entries_reservation
        ON idgen_pool_entries (reservation_id) WHERE reservation_id IS NOT NULL",
    "CREATE TABLE IF NOT EXISTS idgen_identifier_types (
        id UUID PRIMARY KEY,
        body JSONB NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idgen_identifier_types_name
        ON idgen_identifier_types (lower(body->>'name'))
        WHERE NOT (body->>'retired')::boolean",
    "CREATE TABLE IF NOT EXISTS idgen_sources (
        id UUID PRIMARY KEY,
        body JSONB NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS idgen_policies (
        id UUID PRIMARY KEY,
        identifier_type UUID NOT NULL,
        location TEXT,
        body JSONB NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idgen_policies_scope
        ON idgen_policies (identifier_type, COALESCE(location, ''))",
];

/// `PostgreSQL` storage implementation.
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connect and create the schema if it is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or the schema cannot be created.
    pub async fn connect(config: &PostgresStorageConfig) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await?;

        let storage = Self { pool };
        storage.ensure_schema().await?;
        Ok(storage)
    }

    async fn ensure_schema(&self) -> StorageResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn to_db(value: u64) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::Serialization(format!("{value} exceeds BIGINT range")))
}

fn from_db(value: i64) -> StorageResult<u64> {
    u64::try_from(value)
        .map_err(|_| StorageError::Serialization(format!("negative counter value {value}")))
}

#[async_trait]
impl SequenceStorage for PostgresStorage {
    async fn initialize(&self, source: SourceId, first_value: u64) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO idgen_sequences (source_id, next_value, version, updated_at)
             VALUES ($1, $2, 0, now())
             ON CONFLICT (source_id) DO NOTHING",
        )
        .bind(source.as_uuid())
        .bind(to_db(first_value)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, source: SourceId) -> StorageResult<Option<SequenceState>> {
        let row = sqlx::query(
            "SELECT next_value, version, updated_at FROM idgen_sequences WHERE source_id = $1",
        )
        .bind(source.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> StorageResult<SequenceState> {
            Ok(SequenceState {
                source,
                next_value: from_db(row.try_get("next_value")?)?,
                version: from_db(row.try_get("version")?)?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn compare_and_swap(
        &self,
        source: SourceId,
        expected_version: u64,
        next_value: u64,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            "UPDATE idgen_sequences
             SET next_value = $3, version = version + 1, updated_at = now()
             WHERE source_id = $1 AND version = $2",
        )
        .bind(source.as_uuid())
        .bind(to_db(expected_version)?)
        .bind(to_db(next_value)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl PoolStorage for PostgresStorage {
    async fn add_identifiers(&self, source: SourceId, values: &[String]) -> StorageResult<usize> {
        let mut tx = self.pool.begin().await?;
        let mut added = 0;
        for value in values {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let result = sqlx::query(
                "INSERT INTO idgen_pool_entries (source_id, identifier, state)
                 VALUES ($1, $2, 'available')
                 ON CONFLICT (source_id, identifier) DO NOTHING",
            )
            .bind(source.as_uuid())
            .bind(value)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 1 {
                added += 1;
            }
        }
        tx.commit().await?;
        Ok(added)
    }

    async fn reserve(
        &self,
        token: ReservationToken,
        expires_at: DateTime<Utc>,
        order: AllocationOrder,
    ) -> StorageResult<Option<String>> {
        let order_by = match order {
            AllocationOrder::Sequential => "position",
            AllocationOrder::Random => "random()",
        };
        let sql = format!(
            "UPDATE idgen_pool_entries
             SET state = 'reserved', reservation_id = $2, expires_at = $3
             WHERE (source_id, identifier) = (
                 SELECT source_id, identifier FROM idgen_pool_entries
                 WHERE source_id = $1 AND state = 'available'
                 ORDER BY {order_by}
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING identifier"
        );

        let row = sqlx::query(&sql)
            .bind(token.source.as_uuid())
            .bind(token.reservation)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.try_get("identifier")).transpose()?)
    }

    async fn commit(
        &self,
        token: ReservationToken,
        now: DateTime<Utc>,
    ) -> StorageResult<ReservationOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT identifier, expires_at FROM idgen_pool_entries
             WHERE source_id = $1 AND reservation_id = $2 AND state = 'reserved'
             FOR UPDATE",
        )
        .bind(token.source.as_uuid())
        .bind(token.reservation)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(ReservationOutcome::Unknown);
        };
        let identifier: String = row.try_get("identifier")?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;

        let outcome = if expires_at <= now {
            sqlx::query(
                "UPDATE idgen_pool_entries
                 SET state = 'available', reservation_id = NULL, expires_at = NULL
                 WHERE source_id = $1 AND identifier = $2",
            )
            .bind(token.source.as_uuid())
            .bind(&identifier)
            .execute(&mut *tx)
            .await?;
            ReservationOutcome::Expired
        } else {
            sqlx::query(
                "UPDATE idgen_pool_entries
                 SET state = 'used', reservation_id = NULL, expires_at = NULL, used_at = $3
                 WHERE source_id = $1 AND identifier = $2",
            )
            .bind(token.source.as_uuid())
            .bind(&identifier)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            ReservationOutcome::Applied(identifier)
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn release(&self, token: ReservationToken) -> StorageResult<ReservationOutcome> {
        let row = sqlx::query(
            "UPDATE idgen_pool_entries
             SET state = 'available', reservation_id = NULL, expires_at = NULL
             WHERE source_id = $1 AND reservation_id = $2 AND state = 'reserved'
             RETURNING identifier",
        )
        .bind(token.source.as_uuid())
        .bind(token.reservation)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => ReservationOutcome::Applied(row.try_get("identifier")?),
            None => ReservationOutcome::Unknown,
        })
    }

    async fn release_expired(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query(
            "UPDATE idgen_pool_entries
             SET state = 'available', reservation_id = NULL, expires_at = NULL
             WHERE state = 'reserved' AND expires_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }

    async fn counts(&self, source: SourceId) -> StorageResult<PoolCounts> {
        let rows = sqlx::query(
            "SELECT state, COUNT(*) AS total FROM idgen_pool_entries
             WHERE source_id = $1 GROUP BY state",
        )
        .bind(source.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        let mut counts = PoolCounts::default();
        for row in rows {
            let state: String = row.try_get("state")?;
            let total = from_db(row.try_get("total")?)?;
            match state.as_str() {
                "available" => counts.available = total,
                "reserved" => counts.reserved = total,
                "used" => counts.used = total,
                other => {
                    return Err(StorageError::Serialization(format!(
                        "unknown pool entry state '{other}'"
                    )));
                }
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl ConfigStorage for PostgresStorage {
    async fn create_identifier_type(&self, identifier_type: &IdentifierType) -> StorageResult<()> {
        // A live duplicate name violates idgen_identifier_types_name.
        sqlx::query("INSERT INTO idgen_identifier_types (id, body) VALUES ($1, $2)")
            .bind(identifier_type.id.as_uuid())
            .bind(Json(identifier_type))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_identifier_type(&self, identifier_type: &IdentifierType) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO idgen_identifier_types (id, body) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET body = EXCLUDED.body",
        )
        .bind(identifier_type.id.as_uuid())
        .bind(Json(identifier_type))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_identifier_type(
        &self,
        id: IdentifierTypeId,
    ) -> StorageResult<Option<IdentifierType>> {
        let row: Option<(Json<IdentifierType>,)> =
            sqlx::query_as("SELECT body FROM idgen_identifier_types WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(Json(t),)| t))
    }

    async fn list_identifier_types(&self) -> StorageResult<Vec<IdentifierType>> {
        let rows: Vec<(Json<IdentifierType>,)> =
            sqlx::query_as("SELECT body FROM idgen_identifier_types")
                .fetch_all(&self.pool)
                .await?;
        let mut types: Vec<_> = rows.into_iter().map(|(Json(t),)| t).collect();
        types.sort_by_key(|t| t.created_at);
        Ok(types)
    }

    async fn save_source(&self, source: &IdentifierSource) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO idgen_sources (id, body) VALUES ($1, $2)
             ON CONFLICT (id) DO UPDATE SET body = EXCLUDED.body",
        )
        .bind(source.id.as_uuid())
        .bind(Json(source))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_source(&self, id: SourceId) -> StorageResult<Option<IdentifierSource>> {
        let row: Option<(Json<IdentifierSource>,)> =
            sqlx::query_as("SELECT body FROM idgen_sources WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(Json(s),)| s))
    }

    async fn list_sources(&self) -> StorageResult<Vec<IdentifierSource>> {
        let rows: Vec<(Json<IdentifierSource>,)> = sqlx::query_as("SELECT body FROM idgen_sources")
            .fetch_all(&self.pool)
            .await?;
        let mut sources: Vec<_> = rows.into_iter().map(|(Json(s),)| s).collect();
        sources.sort_by_key(|s| s.created_at);
        Ok(sources)
    }

    async fn save_policy(&self, policy: &AutoGenerationPolicy) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO idgen_policies (id, identifier_type, location, body) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE
             SET identifier_type = EXCLUDED.identifier_type,
                 location = EXCLUDED.location,
                 body = EXCLUDED.body",
        )
        .bind(policy.id.as_uuid())
        .bind(policy.identifier_type.as_uuid())
        .bind(policy.location.as_ref().map(LocationId::as_str))
        .bind(Json(policy))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_policy(
        &self,
        identifier_type: IdentifierTypeId,
        location: Option<&LocationId>,
    ) -> StorageResult<Option<AutoGenerationPolicy>> {
        let row: Option<(Json<AutoGenerationPolicy>,)> = sqlx::query_as(
            "SELECT body FROM idgen_policies
             WHERE identifier_type = $1 AND location IS NOT DISTINCT FROM $2",
        )
        .bind(identifier_type.as_uuid())
        .bind(location.map(LocationId::as_str))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(Json(p),)| p))
    }

    async fn list_policies(&self) -> StorageResult<Vec<AutoGenerationPolicy>> {
        let rows: Vec<(Json<AutoGenerationPolicy>,)> =
            sqlx::query_as("SELECT body FROM idgen_policies")
                .fetch_all(&self.pool)
                .await?;
        let mut policies: Vec<_> = rows.into_iter().map(|(Json(p),)| p).collect();
        policies.sort_by_key(|p| p.updated_at);
        Ok(policies)
    }

    async fn delete_policy(&self, id: PolicyId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM idgen_policies WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn health_check(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgresql"
    }
}
