//! Router error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Missing or invalid Host header")]
    MissingHost,

    #[error("No site for {0}")]
    UnknownSite(String),

    #[error("Routing store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid artifact pointer: {0}")]
    InvalidPointer(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Upstream request failed: {0}")]
    Upstream(String),
}

impl RouterError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MissingHost | Self::UnknownSite(_) => StatusCode::NOT_FOUND,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidPointer(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "Request failed");
        }
        (status, self.to_string()).into_response()
    }
}
