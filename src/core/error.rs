use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub type Result<T> = std::result::Result<T, ApiError>;

/// Error taxonomy for the API. Each variant carries a human-readable message
/// and maps to one status code and one machine-readable error code.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request is malformed or fails a precondition the client can fix.
    #[error("{0}")]
    Validation(String),

    /// Bearer token missing, malformed, or rejected by the identity provider.
    #[error("{0}")]
    Authentication(String),

    /// Requested resource does not exist (cluster, inventory entry).
    #[error("{0}")]
    NotFound(String),

    /// Resource already exists, or an operation on it is already in flight.
    #[error("{0}")]
    Conflict(String),

    /// An external collaborator (vault, inventory, ...) failed or timed out.
    #[error("{message}")]
    ExternalService { service: String, message: String },

    /// Anything unanticipated. The detail stays in the server log.
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn external(service: &str, message: impl Into<String>) -> Self {
        ApiError::ExternalService {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::ExternalService { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> String {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR".to_string(),
            ApiError::Authentication(_) => "AUTHENTICATION_ERROR".to_string(),
            ApiError::NotFound(_) => "RESOURCE_NOT_FOUND".to_string(),
            ApiError::Conflict(_) => "RESOURCE_CONFLICT".to_string(),
            ApiError::ExternalService { service, .. } => {
                format!("EXTERNAL_SERVICE_ERROR_{}", service.to_uppercase())
            }
            ApiError::Internal(_) => "INTERNAL_ERROR".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(ref e) = self {
            tracing::error!("Unhandled internal error: {:#}", e);
        }
        let body = serde_json::json!({
            "error": self.to_string(),
            "error_code": self.error_code(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError::Internal(anyhow::anyhow!("database error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(
            ApiError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Authentication("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::external("vault", "sealed").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn external_errors_carry_the_collaborator_name() {
        let err = ApiError::external("inventory", "timed out");
        assert_eq!(err.error_code(), "EXTERNAL_SERVICE_ERROR_INVENTORY");
    }

    #[test]
    fn internal_errors_hide_the_detail() {
        let err = ApiError::Internal(anyhow::anyhow!("secret stack trace"));
        assert_eq!(err.to_string(), "Internal server error");
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }
}
