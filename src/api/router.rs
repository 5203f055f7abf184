//! Router setup and configuration.

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::api::handlers::{health, identifiers, policies, sources, types};
use crate::api::state::AppState;

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    // Health and metrics routes
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/metrics", get(health::metrics));

    // Configuration routes
    let config_routes = Router::new()
        .route(
            "/v1/identifier-types",
            post(types::create_type).get(types::list_types),
        )
        .route("/v1/identifier-types/{id}", get(types::get_type))
        .route("/v1/identifier-types/{id}/retire", post(types::retire_type))
        .route(
            "/v1/sources",
            post(sources::create_source).get(sources::list_sources),
        )
        .route("/v1/sources/{id}", get(sources::get_source))
        .route("/v1/sources/{id}/retire", post(sources::retire_source))
        .route(
            "/v1/sources/{id}/pool",
            post(sources::upload_pool).get(sources::pool_status),
        )
        .route(
            "/v1/policies",
            put(policies::upsert_policy).get(policies::list_policies),
        )
        .route("/v1/policies/{id}", delete(policies::delete_policy));

    // Generation routes
    let identifier_routes = Router::new()
        .route("/v1/identifiers", post(identifiers::generate))
        .route("/v1/identifiers/validate", post(identifiers::validate))
        .route(
            "/v1/reservations/{token}/commit",
            post(identifiers::commit_reservation),
        )
        .route(
            "/v1/reservations/{token}/release",
            post(identifiers::release_reservation),
        );

    Router::new()
        .merge(health_routes)
        .merge(config_routes)
        .merge(identifier_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
