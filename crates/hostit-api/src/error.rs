//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    NotImplemented(String),
    BadGateway(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::NotImplemented(msg) => (StatusCode::NOT_IMPLEMENTED, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<hostit_core::Error> for ApiError {
    fn from(err: hostit_core::Error) -> Self {
        use hostit_core::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            Error::Conflict(msg) => ApiError::Conflict(msg),
            Error::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            Error::Dispatch(_)
            | Error::JobService(_)
            | Error::Registry(_)
            | Error::Provisioning(_) => ApiError::BadGateway(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<hostit_db::DbError> for ApiError {
    fn from(err: hostit_db::DbError) -> Self {
        hostit_core::Error::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostit_core::Error;

    #[test]
    fn test_status_mapping() {
        let status = |e: Error| ApiError::from(e).into_response().status();
        assert_eq!(status(Error::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(Error::InvalidInput("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(Error::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(status(Error::Dispatch("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status(Error::Storage("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_duplicate_maps_to_conflict() {
        let err = ApiError::from(hostit_db::DbError::Duplicate("subdomain docs".into()));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }
}
