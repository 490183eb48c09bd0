use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;
use crate::core::error::ApiError;

/// Verified identity attached to the request once the bearer token passes.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
}

/// Bearer-token middleware in front of every cluster route. The token is
/// checked by the configured identity provider; handlers read the verified
/// user from the request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string());

    let token = match token {
        Some(t) => t,
        None => {
            return ApiError::Authentication("No token provided".to_string()).into_response();
        }
    };

    match state.verifier.verify(&token).await {
        Ok(claims) => {
            req.extensions_mut().insert(AuthContext {
                user_id: claims.user_id,
            });
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}
