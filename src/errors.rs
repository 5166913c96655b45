use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("no function mapping for '{0}'")]
    MappingNotFound(String),

    #[error("no credential configured for service '{0}'")]
    CredentialNotFound(String),

    #[error("credential for service '{0}' is inactive")]
    CredentialInactive(String),

    #[error("rate limit reached for service '{0}'")]
    RateLimitExceeded(String),

    #[error("{service} call failed: {message}")]
    ProviderCallFailed { service: String, message: String },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::ValidationFailed(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_request_error",
                "validation_failed",
                self.to_string(),
            ),
            AppError::InvalidInput(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_input",
                self.to_string(),
            ),
            AppError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "not_found",
                self.to_string(),
            ),
            AppError::MappingNotFound(_) => (
                StatusCode::NOT_FOUND,
                "routing_error",
                "mapping_not_found",
                self.to_string(),
            ),
            AppError::CredentialNotFound(_) => (
                StatusCode::FAILED_DEPENDENCY,
                "routing_error",
                "credential_not_found",
                self.to_string(),
            ),
            AppError::CredentialInactive(_) => (
                StatusCode::FAILED_DEPENDENCY,
                "routing_error",
                "credential_inactive",
                self.to_string(),
            ),
            AppError::RateLimitExceeded(_) => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_error",
                "rate_limit_exceeded",
                self.to_string(),
            ),
            AppError::ProviderCallFailed { .. } => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "provider_call_failed",
                self.to_string(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_joins_reasons() {
        let err = AppError::ValidationFailed(vec!["too short".into(), "bad prefix".into()]);
        assert_eq!(err.to_string(), "validation failed: too short; bad prefix");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::MappingNotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::RateLimitExceeded("x".into()).into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::Internal(anyhow::anyhow!("boom")).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
