use axum::{Json, extract::State, http::StatusCode};

use super::super::AppState;
use crate::core::health::{HealthReport, system_health};

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = system_health(
        &state.store,
        &state.secrets,
        &state.inventory,
        &state.verifier,
    )
    .await;
    let code = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

/// Readiness gates on the database only; the service can serve (and fail
/// requests honestly) while collaborators are degraded.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ready" })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not_ready", "error": e.to_string() })),
        ),
    }
}
