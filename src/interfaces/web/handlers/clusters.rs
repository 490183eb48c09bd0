use axum::{Extension, Json, extract::State, http::StatusCode};

use super::super::AppState;
use super::super::auth::AuthContext;
use crate::core::error::ApiError;
use crate::core::validation::{CreateClusterRequest, UpdateServiceAccountRequest};

pub async fn create_cluster(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CreateClusterRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let created = state
        .orchestrator
        .create_cluster(&auth.user_id, payload)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": created.cluster.id,
            "name": created.cluster.name,
            "status": created.cluster.status,
            "created_at": created.cluster.created_at.to_rfc3339(),
            "updated_at": created.cluster.updated_at.to_rfc3339(),
            "execution": {
                "id": created.execution.id,
                "playbook_name": created.execution.playbook_name,
                "status": created.execution.status,
                "started_at": created.execution.started_at.to_rfc3339(),
                "pid": created.execution.pid,
            },
        })),
    ))
}

pub async fn update_service_account(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<UpdateServiceAccountRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let cluster_name = payload.cluster_name.clone();
    let execution = state
        .orchestrator
        .update_service_account(&auth.user_id, payload)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "message": format!("Service account update started for cluster {}", cluster_name),
            "execution_id": execution.id,
        })),
    ))
}
