//! Identifier source handlers.
//!
//! Remote source credentials are masked in every response.

use axum::{
    Json,
    extract::{Path, State},
};

use crate::api::state::AppState;
use crate::domain::{
    ApiResponse, IdentifierSource, NewIdentifierSource, PoolStatusResponse, PoolUploadRequest,
    PoolUploadResponse, SourceId,
};
use crate::error::Result;

/// Create an identifier source.
///
/// # Errors
///
/// Returns an error if the definition is invalid or its type is unknown or retired.
pub async fn create_source(
    State(state): State<AppState>,
    Json(request): Json<NewIdentifierSource>,
) -> Result<Json<ApiResponse<IdentifierSource>>> {
    let source = state.admin_service.create_identifier_source(request).await?;
    Ok(Json(ApiResponse::success(source.redacted())))
}

/// List identifier sources.
///
/// # Errors
///
/// Returns an error if storage fails.
pub async fn list_sources(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<IdentifierSource>>>> {
    let sources = state.admin_service.list_identifier_sources().await?;
    Ok(Json(ApiResponse::success(
        sources.iter().map(IdentifierSource::redacted).collect(),
    )))
}

/// Get one identifier source.
///
/// # Errors
///
/// Returns an error if the source does not exist.
pub async fn get_source(
    State(state): State<AppState>,
    Path(id): Path<SourceId>,
) -> Result<Json<ApiResponse<IdentifierSource>>> {
    let source = state.admin_service.get_identifier_source(id).await?;
    Ok(Json(ApiResponse::success(source.redacted())))
}

/// Retire an identifier source.
///
/// # Errors
///
/// Returns an error if the source does not exist.
pub async fn retire_source(
    State(state): State<AppState>,
    Path(id): Path<SourceId>,
) -> Result<Json<ApiResponse<IdentifierSource>>> {
    let source = state.admin_service.retire_identifier_source(id).await?;
    Ok(Json(ApiResponse::success(source.redacted())))
}

/// Load identifiers into a pool source.
///
/// # Errors
///
/// Returns an error if the source is not a pool or the values are blank.
pub async fn upload_pool(
    State(state): State<AppState>,
    Path(id): Path<SourceId>,
    Json(request): Json<PoolUploadRequest>,
) -> Result<Json<ApiResponse<PoolUploadResponse>>> {
    let added = state
        .admin_service
        .add_pool_identifiers(id, &request.identifiers)
        .await?;
    Ok(Json(ApiResponse::success(PoolUploadResponse { added })))
}

/// Pool entry counts.
///
/// # Errors
///
/// Returns an error if the source is not a pool.
pub async fn pool_status(
    State(state): State<AppState>,
    Path(id): Path<SourceId>,
) -> Result<Json<ApiResponse<PoolStatusResponse>>> {
    let status = state.admin_service.pool_status(id).await?;
    Ok(Json(ApiResponse::success(status)))
}
