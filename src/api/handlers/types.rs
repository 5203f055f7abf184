//! Identifier type handlers.

use axum::{
    Json,
    extract::{Path, State},
};

use crate::api::state::AppState;
use crate::domain::{ApiResponse, IdentifierType, IdentifierTypeId, NewIdentifierType};
use crate::error::Result;

/// Create an identifier type.
///
/// # Errors
///
/// Returns an error if the definition is invalid or the name is taken.
pub async fn create_type(
    State(state): State<AppState>,
    Json(request): Json<NewIdentifierType>,
) -> Result<Json<ApiResponse<IdentifierType>>> {
    let id_type = state.admin_service.create_identifier_type(request).await?;
    Ok(Json(ApiResponse::success(id_type)))
}

/// List identifier types.
///
/// # Errors
///
/// Returns an error if storage fails.
pub async fn list_types(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<IdentifierType>>>> {
    let types = state.admin_service.list_identifier_types().await?;
    Ok(Json(ApiResponse::success(types)))
}

/// Get one identifier type.
///
/// # Errors
///
/// Returns an error if the type does not exist.
pub async fn get_type(
    State(state): State<AppState>,
    Path(id): Path<IdentifierTypeId>,
) -> Result<Json<ApiResponse<IdentifierType>>> {
    let id_type = state.admin_service.get_identifier_type(id).await?;
    Ok(Json(ApiResponse::success(id_type)))
}

/// Retire an identifier type.
///
/// # Errors
///
/// Returns an error if the type does not exist.
pub async fn retire_type(
    State(state): State<AppState>,
    Path(id): Path<IdentifierTypeId>,
) -> Result<Json<ApiResponse<IdentifierType>>> {
    let id_type = state.admin_service.retire_identifier_type(id).await?;
    Ok(Json(ApiResponse::success(id_type)))
}
