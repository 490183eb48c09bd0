use axum::{
    Router, middleware,
    routing::{get, post},
};

use super::AppState;
use super::auth;
use super::handlers::{clusters, health, status};

pub fn build_api_router(state: AppState) -> Router {
    // Probes stay reachable without a token.
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/api/v1/ready", get(health::readiness_check))
        .with_state(state.clone());

    let authed_routes = Router::new()
        .route("/clusters", post(clusters::create_cluster))
        .route("/api/v1/clusters", post(clusters::create_cluster))
        .route(
            "/update_service_account",
            post(clusters::update_service_account),
        )
        .route(
            "/check_cluster_status/{cluster_name}",
            get(status::check_cluster_status),
        )
        .route("/check_status", get(status::check_status))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .with_state(state);

    public_routes.merge(authed_routes)
}
