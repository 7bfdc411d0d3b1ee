//! Custom error types for the API service

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::CoreError;
use serde_json::{Value, json};
use thiserror::Error;

/// Custom error type for the API service
#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing or malformed bearer token
    #[error("Unauthorized")]
    Unauthorized,

    /// Request body that does not fit the endpoint
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Core(err) => match err {
                CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                CoreError::DuplicateKey { .. }
                | CoreError::Conflict { .. }
                | CoreError::CyclicInheritance { .. } => StatusCode::CONFLICT,
                CoreError::Validation(_)
                | CoreError::InvalidPermissions(_)
                | CoreError::InvalidRoles(_)
                | CoreError::InvalidCodeFormat => StatusCode::BAD_REQUEST,
                CoreError::InvalidCredentials
                | CoreError::InvalidChallenge
                | CoreError::InvalidCode
                | CoreError::SessionExpired
                | CoreError::SessionInactive
                | CoreError::InactivityTimeout => StatusCode::UNAUTHORIZED,
                CoreError::AccountInactive => StatusCode::FORBIDDEN,
                CoreError::Busy { .. } => StatusCode::SERVICE_UNAVAILABLE,
                CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Core(err) => err.code(),
        }
    }

    /// Machine-readable payload for kinds that carry one
    fn details(&self) -> Option<Value> {
        let ApiError::Core(err) = self else {
            return None;
        };
        match err {
            CoreError::Conflict { reasons, .. } => Some(json!(reasons)),
            CoreError::InvalidPermissions(refs) | CoreError::InvalidRoles(refs) => Some(json!(refs)),
            CoreError::CyclicInheritance { role_id } => Some(json!({ "roleId": role_id })),
            CoreError::Busy { aggregate } => Some(json!(aggregate)),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        // Internal messages are not echoed back to clients
        let message = match &self {
            ApiError::Core(CoreError::Internal(_)) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let mut body = json!({
            "error": self.code(),
            "message": message,
        });
        if let Some(details) = self.details() {
            body["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;
