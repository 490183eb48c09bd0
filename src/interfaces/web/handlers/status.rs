use axum::{
    Extension, Json,
    extract::{Path, State},
};

use super::super::AppState;
use super::super::auth::AuthContext;
use crate::core::error::ApiError;
use crate::core::orchestrator::ClusterStatusView;

pub async fn check_cluster_status(
    Path(cluster_name): Path<String>,
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ClusterStatusView>, ApiError> {
    let view = state
        .orchestrator
        .cluster_status(&auth.user_id, &cluster_name)
        .await?;
    Ok(Json(view))
}

pub async fn check_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<ClusterStatusView>>, ApiError> {
    let views = state.orchestrator.all_statuses(&auth.user_id).await?;
    Ok(Json(views))
}
