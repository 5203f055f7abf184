//! Error handling module.
//!
//! This module provides unified error handling with proper HTTP status code mapping
//! and standardized API error responses.

pub mod codes;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::domain::{IdentifierTypeId, LocationId, SourceId};
use crate::service::check_digit::CheckDigitError;
use crate::domain::EncodeError;
use crate::service::remote::RemoteError;
use crate::service::validator::ValidationError;

pub use codes::{ErrorCategory, ErrorCode};

/// Service-level error type.
#[derive(Debug, thiserror::Error)]
pub enum IdGenError {
    /// Invalid type, source or policy definition.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A record with the same unique key already exists.
    #[error("Configuration already exists: {0}")]
    ConfigExists(String),

    /// Neither a location nor a global policy exists.
    #[error("No auto-generation policy configured for type {identifier_type} at {}", location_label(.location.as_ref()))]
    NoPolicyConfigured {
        /// Identifier type.
        identifier_type: IdentifierTypeId,
        /// Requested location.
        location: Option<LocationId>,
    },

    /// The referenced type or source is retired.
    #[error("Retired: {0}")]
    Retired(String),

    /// The generator produced a value its own type rejects.
    #[error("Generated value '{value}' is invalid: {reason}")]
    GeneratedValueInvalid {
        /// Rejected value.
        value: String,
        /// Validator message.
        reason: String,
    },

    /// Sequential space exhausted.
    #[error("Capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// Pool has no available identifiers.
    #[error("Pool exhausted for source {0}")]
    PoolExhausted(SourceId),

    /// Counter contention outlasted the retry budget.
    #[error("Allocation timed out for source {source_id} after {attempts} attempts")]
    AllocationTimeout {
        /// Contended source.
        source_id: SourceId,
        /// Attempts made.
        attempts: u32,
    },

    /// Remote provider unreachable, failing, or circuit open.
    #[error("Remote source unavailable: {0}")]
    RemoteUnavailable(String),

    /// Cancelled by the caller or deadline exceeded.
    #[error("Operation cancelled")]
    Cancelled,

    /// Automatic generation is disabled for this type and location.
    #[error("Manual entry required for identifier type {0}")]
    ManualEntryRequired(IdentifierTypeId),

    /// The type requires a location and none was given.
    #[error("Identifier type {0} requires a location")]
    LocationRequired(IdentifierTypeId),

    /// Reservation unknown, expired, or already resolved.
    #[error("Invalid reservation: {0}")]
    InvalidReservation(String),

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn location_label(location: Option<&LocationId>) -> String {
    location.map_or_else(|| "any location".to_string(), |l| format!("location {l}"))
}

impl IdGenError {
    /// Get the error code for this error.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidConfig(_) => ErrorCode::INVALID_CONFIG,
            Self::ConfigExists(_) => ErrorCode::CONFIG_EXISTS,
            Self::NoPolicyConfigured { .. } => ErrorCode::NO_POLICY_CONFIGURED,
            Self::Retired(_) => ErrorCode::RETIRED,
            Self::GeneratedValueInvalid { .. } => ErrorCode::GENERATED_VALUE_INVALID,
            Self::CapacityExhausted(_) => ErrorCode::CAPACITY_EXHAUSTED,
            Self::PoolExhausted(_) => ErrorCode::POOL_EXHAUSTED,
            Self::AllocationTimeout { .. } => ErrorCode::ALLOCATION_TIMEOUT,
            Self::RemoteUnavailable(_) => ErrorCode::REMOTE_UNAVAILABLE,
            Self::Cancelled => ErrorCode::CANCELLED,
            Self::ManualEntryRequired(_) => ErrorCode::MANUAL_ENTRY_REQUIRED,
            Self::LocationRequired(_) => ErrorCode::LOCATION_REQUIRED,
            Self::InvalidReservation(_) => ErrorCode::INVALID_RESERVATION,
            Self::BadRequest(_) => ErrorCode::BAD_REQUEST,
            Self::NotFound(_) => ErrorCode::NOT_FOUND,
            Self::Storage(_) => ErrorCode::STORAGE_ERROR,
            Self::Internal(_) => ErrorCode::INTERNAL_ERROR,
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "invalid_config",
            Self::ConfigExists(_) => "config_exists",
            Self::NoPolicyConfigured { .. } => "no_policy",
            Self::Retired(_) => "retired",
            Self::GeneratedValueInvalid { .. } => "generated_value_invalid",
            Self::CapacityExhausted(_) => "capacity_exhausted",
            Self::PoolExhausted(_) => "pool_exhausted",
            Self::AllocationTimeout { .. } => "allocation_timeout",
            Self::RemoteUnavailable(_) => "remote_unavailable",
            Self::Cancelled => "cancelled",
            Self::ManualEntryRequired(_) => "manual_entry_required",
            Self::LocationRequired(_) => "location_required",
            Self::InvalidReservation(_) => "invalid_reservation",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage",
            Self::Internal(_) => "internal",
        }
    }

    /// Get the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.error_code().category()
    }

    /// Whether the caller may simply try again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transient)
    }

    /// Get the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidConfig(_)
            | Self::BadRequest(_)
            | Self::LocationRequired(_) => StatusCode::BAD_REQUEST,
            Self::ConfigExists(_) | Self::InvalidReservation(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NoPolicyConfigured { .. } | Self::Retired(_) | Self::ManualEntryRequired(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::CapacityExhausted(_)
            | Self::PoolExhausted(_)
            | Self::AllocationTimeout { .. }
            | Self::RemoteUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Cancelled => StatusCode::REQUEST_TIMEOUT,
            Self::GeneratedValueInvalid { .. } | Self::Storage(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<EncodeError> for IdGenError {
    fn from(err: EncodeError) -> Self {
        match err {
            EncodeError::CapacityExhausted { .. } => Self::CapacityExhausted(err.to_string()),
            _ => Self::InvalidConfig(err.to_string()),
        }
    }
}

impl From<CheckDigitError> for IdGenError {
    fn from(err: CheckDigitError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

/// Only format compilation converts; a rejected identifier value is reported
/// in `ValidateResponse` or as `GeneratedValueInvalid` instead.
impl From<ValidationError> for IdGenError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

impl From<RemoteError> for IdGenError {
    fn from(err: RemoteError) -> Self {
        Self::RemoteUnavailable(err.to_string())
    }
}

impl IntoResponse for IdGenError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code().as_i32();
        let category = self.category();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(
                error_code = code,
                status = %status,
                category = %category,
                message = %message,
                "Request failed"
            );
        } else {
            tracing::debug!(
                error_code = code,
                status = %status,
                category = %category,
                message = %message,
                "Request rejected"
            );
        }

        let body = Json(json!({
            "code": code,
            "message": message,
            "data": null
        }));

        (status, body).into_response()
    }
}

/// Storage-specific error type.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Connection error.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("Query failed: {0}")]
    Query(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Lock acquisition failed.
    #[error("Failed to acquire lock: {0}")]
    LockFailed(String),

    /// File I/O error.
    #[error("File I/O error: {0}")]
    FileIO(String),

    /// Data not found.
    #[error("Data not found: {0}")]
    NotFound(String),

    /// A record with the same key already exists.
    #[error("Conflicting record: {0}")]
    Conflict(String),

    /// A stored document exists but cannot be read back.
    #[error("Corrupted record: {0}")]
    Corrupted(String),

    /// Backend not available.
    #[error("Storage backend unavailable")]
    Unavailable,
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::FileIO(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => Self::Unavailable,
            sqlx::Error::Io(e) => Self::Connection(e.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            other => Self::Query(other.to_string()),
        }
    }
}

/// Result type alias using `IdGenError`.
pub type Result<T> = std::result::Result<T, IdGenError>;

/// Result type alias using `StorageError`.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
