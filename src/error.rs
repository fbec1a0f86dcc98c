use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Offer rejected, answer generation failed or negotiation timed out
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Expected media file is missing
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// External decode process failed to start, read or exit cleanly
    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    /// A single frame could not be handed to the track
    #[error("Frame injection failed: {0}")]
    Injection(String),

    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        tracing::error!(
            status = status.as_u16(),
            error_message = %message,
            "Request failed"
        );

        // Plain text body, the front-end shows it verbatim
        (status, message).into_response()
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;
