//! Identifier generation and reservation handlers.

use axum::{
    Json,
    extract::{Path, State},
};

use crate::api::state::AppState;
use crate::domain::{
    ApiResponse, GenerateRequest, GenerateResponse, ReservationResponse, ReservationToken,
    ValidateRequest, ValidateResponse,
};
use crate::error::{IdGenError, Result};
use crate::service::CallContext;

/// Generate an identifier.
///
/// The call is bounded by `server.request_timeout_secs`.
///
/// # Errors
///
/// Returns the generation failure (see [`GenerationService::generate`]).
///
/// [`GenerationService::generate`]: crate::service::GenerationService::generate
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<ApiResponse<GenerateResponse>>> {
    let ctx = CallContext::background().with_timeout(state.config.server.request_timeout());

    let generated = state
        .generation_service
        .generate(&ctx, request.identifier_type, request.location.as_ref())
        .await?;

    Ok(Json(ApiResponse::success(GenerateResponse {
        value: generated.value,
        source: generated.source,
        reservation: generated.reservation,
    })))
}

/// Validate a manually entered identifier.
///
/// # Errors
///
/// Returns an error if the identifier type is unknown.
pub async fn validate(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<ApiResponse<ValidateResponse>>> {
    let verdict = state
        .generation_service
        .validate_identifier(request.identifier_type, &request.value)
        .await?;
    Ok(Json(ApiResponse::success(verdict)))
}

/// Commit a pool reservation.
///
/// # Errors
///
/// Returns an error if the token is malformed, unknown, expired or resolved.
pub async fn commit_reservation(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<ReservationResponse>>> {
    let token = parse_token(&token)?;
    let value = state.generation_service.commit(token).await?;
    Ok(Json(ApiResponse::success(ReservationResponse { value })))
}

/// Release a pool reservation.
///
/// # Errors
///
/// Returns an error if the token is malformed, unknown or resolved.
pub async fn release_reservation(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<ReservationResponse>>> {
    let token = parse_token(&token)?;
    let value = state.generation_service.release(token).await?;
    Ok(Json(ApiResponse::success(ReservationResponse { value })))
}

fn parse_token(raw: &str) -> Result<ReservationToken> {
    raw.parse()
        .map_err(|e: crate::domain::TokenParseError| IdGenError::BadRequest(e.to_string()))
}
