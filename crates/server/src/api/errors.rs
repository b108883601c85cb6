//! API error types mapped to HTTP status codes.
//!
//! Each [`ApiError`] variant maps to a specific HTTP status code and produces
//! a JSON response body `{"error": "message"}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use leaderboard_core::RankError;
use serde_json::json;

/// Application-level error type that implements `IntoResponse`.
///
/// Each variant maps to an HTTP status code:
/// - `NotFound` → 404
/// - `BadRequest` → 400
/// - `Unauthorized` → 401
/// - `InsufficientStorage` → 507
/// - `ServiceUnavailable` → 503
/// - `Internal` → 500
#[derive(Debug)]
pub enum ApiError {
    /// Board or player not found (404).
    NotFound(String),
    /// Invalid request parameters (400).
    BadRequest(String),
    /// Missing or invalid authentication (401).
    Unauthorized(String),
    /// Memory limit exceeded (507).
    InsufficientStorage(String),
    /// WAL or snapshot storage failed; nothing was applied (503).
    ServiceUnavailable(String),
    /// Unexpected server error (500).
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::InsufficientStorage(msg) => (StatusCode::INSUFFICIENT_STORAGE, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        let body = axum::Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

impl From<RankError> for ApiError {
    fn from(e: RankError) -> Self {
        match e {
            RankError::NotFound { .. } | RankError::BoardNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            RankError::InvalidArgument(msg) => ApiError::BadRequest(msg),
            RankError::Unavailable(msg) => {
                tracing::error!("Storage unavailable: {}", msg);
                ApiError::ServiceUnavailable("Storage unavailable".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_error_mapping() {
        let cases = [
            (
                RankError::NotFound {
                    board: "g".into(),
                    entity: "a".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (RankError::BoardNotFound("g".into()), StatusCode::NOT_FOUND),
            (
                RankError::InvalidArgument("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                RankError::Unavailable("disk".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_memory_limit_is_507() {
        let resp = ApiError::InsufficientStorage("full".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INSUFFICIENT_STORAGE);
    }
}
