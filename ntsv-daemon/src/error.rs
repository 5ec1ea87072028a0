//! Error types for ntsv-daemon
//!
//! Playback-level failures are routed through the fallback protocol and never
//! surface here; these variants cover admission, configuration and the
//! control surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Main error type for the daemon
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors from the shared library (category resolution, config discovery)
    #[error(transparent)]
    Common(#[from] ntsv_common::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Sound file probing or transcoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio stream could not be opened
    #[error("Playback error: {0}")]
    Playback(String),

    /// Audio-policy negotiation errors
    #[error("Policy error: {0}")]
    Policy(String),

    /// Type handler failures (initialization, state misuse)
    #[error("Handler error: {0}")]
    Handler(String),

    /// Request refused by admission control
    #[error("Notification rejected: {0}")]
    Rejected(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Daemon loop is gone or did not answer
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using the daemon Error
pub type Result<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Error::Common(
                ntsv_common::Error::InvalidCategory(_) | ntsv_common::Error::InvalidInput(_),
            ) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Error::Rejected(_) => (StatusCode::CONFLICT, "REJECTED"),
            Error::Internal(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
