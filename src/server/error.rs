//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::GenserveError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Errors surfaced to HTTP callers.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed body or job specification
    BadRequest(String),
    /// Readiness gate still closed
    NotReady,
    /// The run failed after it was accepted
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(msg) | ApiError::Internal(msg) => msg,
            ApiError::NotReady => "service is not ready".to_string(),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<GenserveError> for ApiError {
    fn from(err: GenserveError) -> Self {
        match err {
            GenserveError::InvalidJob(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_job_is_bad_request() {
        let err = ApiError::from(GenserveError::InvalidJob("missing prompt".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_engine_error_is_internal() {
        let err = ApiError::from(GenserveError::Engine("weights missing".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(err, ApiError::Internal(msg) if msg.contains("weights missing")));
    }

    #[test]
    fn test_not_ready_is_unavailable() {
        assert_eq!(ApiError::NotReady.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
