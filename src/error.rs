//! Error types for msgbridge.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for msgbridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for msgbridge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Upstream returned status {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("{0}")]
    UpstreamEmpty(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Client-facing message for upstream failures; the detail is only logged.
const UPSTREAM_FAILED: &str = "Upstream request failed";
/// Client-facing message for gateway-side failures.
const INTERNAL_FAILURE: &str = "Internal server error";

impl Error {
    /// HTTP status and wire error type for this error.
    pub fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            Error::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            Error::Upstream(_) | Error::UpstreamStatus { .. } | Error::UpstreamEmpty(_) => {
                (StatusCode::BAD_GATEWAY, "api_error")
            }
            Error::Config(_) | Error::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "api_error")
            }
        }
    }

    /// Message written into the error envelope. Only request errors carry
    /// their detail to the client.
    pub fn public_message(&self) -> String {
        match self {
            Error::BadRequest(_) => self.to_string(),
            Error::Upstream(_) | Error::UpstreamStatus { .. } | Error::UpstreamEmpty(_) => {
                UPSTREAM_FAILED.to_string()
            }
            Error::Config(_) | Error::Internal(_) => INTERNAL_FAILURE.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();

        // Messages-protocol error envelope
        let body = serde_json::json!({
            "type": "error",
            "error": {
                "type": kind,
                "message": self.public_message()
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
