//! Auto-generation policy handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
};

use crate::api::state::AppState;
use crate::domain::{ApiResponse, AutoGenerationPolicy, ListPoliciesQuery, PolicyId, PolicyUpsert};
use crate::error::Result;

/// Create or replace the policy of an (identifier type, location) pair.
///
/// # Errors
///
/// Returns an error if the type or source is unknown or they do not match.
pub async fn upsert_policy(
    State(state): State<AppState>,
    Json(request): Json<PolicyUpsert>,
) -> Result<Json<ApiResponse<AutoGenerationPolicy>>> {
    let policy = state.admin_service.upsert_policy(request).await?;
    Ok(Json(ApiResponse::success(policy)))
}

/// List policies, optionally filtered by identifier type.
///
/// # Errors
///
/// Returns an error if storage fails.
pub async fn list_policies(
    State(state): State<AppState>,
    Query(query): Query<ListPoliciesQuery>,
) -> Result<Json<ApiResponse<Vec<AutoGenerationPolicy>>>> {
    let policies = state
        .admin_service
        .list_policies(query.identifier_type)
        .await?;
    Ok(Json(ApiResponse::success(policies)))
}

/// Delete a policy.
///
/// # Errors
///
/// Returns an error if the policy does not exist.
pub async fn delete_policy(
    State(state): State<AppState>,
    Path(id): Path<PolicyId>,
) -> Result<Json<ApiResponse<()>>> {
    state.admin_service.delete_policy(id).await?;
    Ok(Json(ApiResponse::ok()))
}
