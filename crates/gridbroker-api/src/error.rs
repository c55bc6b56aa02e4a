//! API error handling.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    /// Farmer wallet address rejected for a declared currency.
    FailedDependency(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::FailedDependency(msg) => (StatusCode::FAILED_DEPENDENCY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<gridbroker_core::Error> for ApiError {
    fn from(err: gridbroker_core::Error) -> Self {
        match err {
            gridbroker_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            gridbroker_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            gridbroker_core::Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            gridbroker_core::Error::Conflict(msg) => ApiError::Conflict(msg),
            gridbroker_core::Error::DependencyFailure(msg) => ApiError::FailedDependency(msg),
            gridbroker_core::Error::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<gridbroker_db::DbError> for ApiError {
    fn from(err: gridbroker_db::DbError) -> Self {
        match err {
            gridbroker_db::DbError::NotFound(msg) => ApiError::NotFound(msg),
            gridbroker_db::DbError::Duplicate(msg) => ApiError::Conflict(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
