//! HTTP surface
//!
//! Exposes `GET /health`, `GET /` and `POST /process` on an axum router.
//! Multipart parsing, mail id validation and response shaping live here; the
//! extraction work is delegated to [`pipeline::process_request`].

use std::sync::Arc;
use std::time::Instant;

use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::attachment::{SUPPORTED_EXTENSIONS, sanitize_filename};
use crate::config::ServiceConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{DEFAULT_MAIL_ID, ProcessResponse, ProcessingRequest, UploadedFile};
use crate::openai::CompletionClient;
use crate::pipeline;
use crate::util::duration_ms;
use crate::validate::CALENDAR_KEY;

/// Longest accepted `mail_id`
const MAX_MAIL_ID_CHARS: usize = 256;
const SERVICE_NAME: &str = "mail-extract-rs";

/// Shared, immutable handler state
pub struct AppState<C> {
    config: Arc<ServiceConfig>,
    client: Arc<C>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            client: Arc::clone(&self.client),
        }
    }
}

/// Build the service router
pub fn router<C: CompletionClient>(config: Arc<ServiceConfig>, client: Arc<C>) -> Router {
    let body_limit = config.max_request_bytes;
    Router::new()
        .route("/", get(index::<C>))
        .route("/health", get(health))
        .route("/process", post(process::<C>))
        .fallback(handler_404)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { config, client })
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": SERVICE_NAME }))
}

async fn index<C: CompletionClient>(State(state): State<AppState<C>>) -> Json<Value> {
    let max_bytes = state.config.max_attachment_bytes;
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "GET /health": "Health check",
            "POST /process": "Process an email with attachments (multipart/form-data with optional \"mail_id\" and zero or more \"files\")",
            "GET /": "This help page",
        },
        "supported_formats": SUPPORTED_EXTENSIONS,
        "max_file_size_bytes": max_bytes,
        "max_file_size": format!("{}MB", max_bytes / (1024 * 1024)),
        "usage": {
            "curl_example": "curl -X POST -F \"mail_id=001\" -F \"files=@invoice.pdf\" http://localhost:8080/process",
            "form_fields": {
                "mail_id": format!("Optional - unique identifier for the email (default: {DEFAULT_MAIL_ID})"),
                "files": "Optional - one or more attachment files",
            },
        },
    }))
}

async fn handler_404() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "status": "error",
            "code": "not_found",
            "message": "route does not exist",
        })),
    )
}

/// `POST /process`
///
/// Responds with exactly one JSON document: the result envelope on success,
/// or an error body from [`AppError`].
async fn process<C: CompletionClient>(
    State(state): State<AppState<C>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ProcessResponse>, AppError> {
    let started = Instant::now();
    let span = tracing::info_span!("process", request_id = %Uuid::new_v4());

    async move {
        let multipart = multipart.map_err(|e| {
            AppError::invalid(format!("expected a multipart/form-data body: {}", e.body_text()))
        })?;
        let request = read_processing_request(multipart, state.config.max_attachment_bytes).await?;
        let resp =
            pipeline::process_request(&state.config, state.client.as_ref(), request).await?;
        tracing::info!(duration_ms = duration_ms(started), "request served");
        Ok(Json(resp))
    }
    .instrument(span)
    .await
}

/// Collect `mail_id` and `files` parts from the multipart body
///
/// Parts named `files` with an empty filename are ignored; unknown fields are
/// skipped.
async fn read_processing_request(
    mut multipart: Multipart,
    max_attachment_bytes: usize,
) -> AppResult<ProcessingRequest> {
    let mut mail_id = None;
    let mut attachments = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("mail_id") => {
                mail_id = Some(field.text().await.map_err(multipart_error)?);
            }
            Some("files") => {
                let raw_name = field.file_name().unwrap_or_default().to_owned();
                if raw_name.trim().is_empty() {
                    continue;
                }
                let content_type = field.content_type().map(str::to_owned);
                let (bytes, oversized) = read_bounded(field, max_attachment_bytes).await?;
                attachments.push(UploadedFile {
                    filename: sanitize_filename(&raw_name),
                    content_type,
                    bytes,
                    oversized,
                });
            }
            other => tracing::debug!(field = ?other, "ignoring unknown form field"),
        }
    }

    Ok(ProcessingRequest {
        mail_id: resolve_mail_id(mail_id)?,
        attachments,
    })
}

/// Stream a file part, keeping at most `limit` bytes
///
/// Once the limit is crossed the buffered bytes are released and the rest of
/// the part is drained, so an oversized upload never sits in memory.
async fn read_bounded(mut field: Field<'_>, limit: usize) -> AppResult<(Vec<u8>, bool)> {
    let mut bytes = Vec::new();
    let mut oversized = false;

    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if oversized {
            continue;
        }
        if bytes.len() + chunk.len() > limit {
            oversized = true;
            bytes = Vec::new();
            continue;
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok((bytes, oversized))
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::invalid(format!("malformed multipart body: {}", e.body_text()))
    }
}

/// Apply the default for a missing or blank `mail_id` and reject unsafe ones
fn resolve_mail_id(raw: Option<String>) -> AppResult<String> {
    let trimmed = raw.as_deref().map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Ok(DEFAULT_MAIL_ID.to_owned());
    }
    if trimmed.chars().any(char::is_control) {
        return Err(AppError::invalid("mail_id must not contain control characters"));
    }
    if trimmed == CALENDAR_KEY {
        return Err(AppError::invalid(format!(
            "mail_id must not be the reserved key {CALENDAR_KEY}"
        )));
    }
    if trimmed.chars().count() > MAX_MAIL_ID_CHARS {
        return Err(AppError::invalid(format!(
            "mail_id must be at most {MAX_MAIL_ID_CHARS} characters"
        )));
    }
    Ok(trimmed.to_owned())
}
