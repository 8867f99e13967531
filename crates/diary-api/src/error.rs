//! API error handling
//!
//! Author: hephaex@gmail.com

use crate::auth::jwt::JwtError;
use crate::auth::password::PasswordError;
use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diary_core::DiaryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Secure transport required: {0}")]
    InsecureTransport(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InsecureTransport(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidCredentials | AppError::InvalidToken => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn to_api_error(&self) -> ApiError {
        match self {
            AppError::Validation(msg) => ApiError::new("VALIDATION_ERROR", msg.clone()),
            AppError::InsecureTransport(msg) => ApiError::new("INSECURE_TRANSPORT", msg.clone()),
            AppError::InvalidCredentials => {
                ApiError::new("INVALID_CREDENTIALS", "Invalid username or password")
            }
            AppError::InvalidToken => ApiError::new("UNAUTHORIZED", "Authentication required"),
            AppError::NotFound(msg) => ApiError::new("NOT_FOUND", format!("{msg} not found")),
            AppError::Conflict(msg) => ApiError::new("CONFLICT", msg.clone()),
            // Details stay in the logs
            AppError::Internal(_) => ApiError::new("INTERNAL_ERROR", "Internal server error"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(detail) = &self {
            tracing::error!(error = %detail, "Internal error while handling request");
        }

        (self.status(), Json(self.to_api_error())).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<DiaryError> for AppError {
    fn from(err: DiaryError) -> Self {
        match err {
            DiaryError::NotFound(msg) => AppError::NotFound(msg),
            DiaryError::Conflict(msg) => AppError::Conflict(msg),
            DiaryError::ValidationError(msg) => AppError::Validation(msg),
            DiaryError::DatabaseError(msg) => AppError::Internal(format!("Database error: {msg}")),
            DiaryError::ConfigError(msg) => {
                AppError::Internal(format!("Configuration error: {msg}"))
            }
            DiaryError::Other(err) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<JwtError> for AppError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::InvalidToken => AppError::InvalidToken,
            JwtError::Encoding(e) => AppError::Internal(format!("Token encoding failed: {e}")),
            JwtError::LifetimeOverflow(ttl) => {
                AppError::Internal(format!("Token lifetime of {ttl}s is out of range"))
            }
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection.body_text(), "Rejected request body");
        AppError::Validation("Invalid request body".to_string())
    }
}

/// JSON request body whose rejections are reported as [`AppError::Validation`]
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::InsecureTransport("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::InvalidCredentials.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::InvalidToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::NotFound("User".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_detail_not_exposed() {
        let body = AppError::Internal("connection refused at 10.0.0.3".into()).to_api_error();
        assert_eq!(body.code, "INTERNAL_ERROR");
        assert!(!body.message.contains("10.0.0.3"));
    }

    #[test]
    fn test_core_error_mapping() {
        assert!(matches!(
            AppError::from(DiaryError::Conflict("username taken".into())),
            AppError::Conflict(_)
        ));
        assert!(matches!(
            AppError::from(DiaryError::DatabaseError("locked".into())),
            AppError::Internal(_)
        ));
        assert!(matches!(
            AppError::from(JwtError::InvalidToken),
            AppError::InvalidToken
        ));
    }
}
