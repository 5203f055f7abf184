//! Data Transfer Objects for API requests and responses.

use serde::{Deserialize, Serialize};

use super::{IdentifierTypeId, LocationId, PoolCounts, ReservationToken, SourceId};

/// Standard API response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Response code (0 = success, non-zero = error).
    pub code: i32,

    /// Human-readable message.
    pub message: String,

    /// Response data (null on error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Create a success response.
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    /// Create an error response.
    pub fn error(code: i32, message: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl ApiResponse<()> {
    /// Create a success response with no data.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: None,
        }
    }
}

/// Request to generate an identifier.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    /// Identifier type.
    pub identifier_type: IdentifierTypeId,

    /// Location of the registration, if any.
    #[serde(default)]
    pub location: Option<LocationId>,
}

/// Response for identifier generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Generated identifier.
    pub value: String,

    /// Issuing source.
    pub source: SourceId,

    /// Reservation to commit or release (pool sources).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<ReservationToken>,
}

/// Request to validate a manually entered identifier.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidateRequest {
    /// Identifier type.
    pub identifier_type: IdentifierTypeId,

    /// Candidate value.
    pub value: String,
}

/// Validation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateResponse {
    /// Whether the value is acceptable.
    pub valid: bool,

    /// Reason when invalid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Request to load identifiers into a pool.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolUploadRequest {
    /// Identifiers to add.
    pub identifiers: Vec<String>,
}

/// Pool status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatusResponse {
    /// Pool source.
    pub source: SourceId,

    /// Counts per state.
    #[serde(flatten)]
    pub counts: PoolCounts,
}

/// Response to a pool upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolUploadResponse {
    /// Number of new entries.
    pub added: usize,
}

/// Resolved reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationResponse {
    /// Identifier the reservation held.
    pub value: String,
}

/// Query for listing policies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListPoliciesQuery {
    /// Restrict to one identifier type.
    #[serde(default)]
    pub identifier_type: Option<IdentifierTypeId>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,

    /// Service version.
    pub version: String,
}

/// Readiness check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyResponse {
    /// Overall readiness status.
    pub ready: bool,

    /// Individual component statuses.
    pub components: ReadyComponents,
}

/// Component readiness statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyComponents {
    /// Storage backend status.
    pub storage: bool,
}
