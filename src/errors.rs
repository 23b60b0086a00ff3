//! Application error model with HTTP error mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error handling,
//! and maps each variant to an HTTP status plus a JSON error body so callers
//! always receive a well-formed envelope.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Application error type
///
/// Per-file variants (`UnsupportedFileType`, `FileTooLarge`,
/// `ExtractionFailed`) and `ResponseMalformed` are recorded inside a
/// successful result rather than returned to the caller. Only the remaining
/// variants abort a request.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (bad form field, malformed multipart body)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Attachment extension is not one of the supported formats
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    /// Attachment exceeds the per-file size limit
    #[error("file too large: {0}")]
    FileTooLarge(String),
    /// Attachment of a text format yielded no readable text
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    /// Whole request body exceeds the configured limit
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
    /// Completion endpoint unreachable, timed out, or rejected the request
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    /// Model output could not be parsed as JSON
    #[error("response malformed: {0}")]
    ResponseMalformed(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Stable machine-readable code used in JSON error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::UnsupportedFileType(_) => "unsupported_file_type",
            Self::FileTooLarge(_) => "file_too_large",
            Self::ExtractionFailed(_) => "extraction_failed",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::ModelUnavailable(_) => "model_unavailable",
            Self::ResponseMalformed(_) => "response_malformed",
            Self::Internal(_) => "internal",
        }
    }

    /// HTTP status for this error when it aborts a request
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → 400
    /// - `PayloadTooLarge` → 413
    /// - `ModelUnavailable` → 503
    /// - everything else → 500
    ///
    /// The in-band variants only reach this arm if a caller returns one
    /// instead of recording it.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UnsupportedFileType(_)
            | Self::FileTooLarge(_)
            | Self::ExtractionFailed(_)
            | Self::ResponseMalformed(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "request failed: {self}");
        } else {
            tracing::warn!(code = self.code(), "request rejected: {self}");
        }

        // Internal details stay in the logs.
        let message = match &self {
            Self::Internal(_) => "internal server error".to_owned(),
            other => other.to_string(),
        };

        (
            status,
            Json(json!({
                "status": "error",
                "code": self.code(),
                "message": message,
            })),
        )
            .into_response()
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;
