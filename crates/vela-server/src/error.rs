//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<vela_db::DbError> for ApiError {
    fn from(err: vela_db::DbError) -> Self {
        match err {
            vela_db::DbError::NotFound(msg) => ApiError::NotFound(msg),
            vela_db::DbError::Duplicate(msg) => ApiError::Conflict(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<vela_core::CronError> for ApiError {
    fn from(err: vela_core::CronError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_status() {
        let cases = [
            (vela_db::DbError::NotFound("schedule 9".to_string()), StatusCode::NOT_FOUND),
            (vela_db::DbError::Duplicate("schedule nightly".to_string()), StatusCode::CONFLICT),
            (vela_db::DbError::InvalidData("bad row".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_cron_error_is_bad_request() {
        let err = vela_core::CronError::NoBoundary("0 0 30 2 *".to_string());
        assert_eq!(
            ApiError::from(err).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
