//! Request orchestration
//!
//! Runs one [`ProcessingRequest`] through normalize → prompt → model →
//! validate. Attachment failures degrade per file; only a model failure
//! aborts the request.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;

use crate::attachment;
use crate::config::ServiceConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{
    ExtractedContent, ExtractionResult, FileError, FileRecord, ProcessResponse, ProcessingRequest,
    ResultStatus, UploadedFile,
};
use crate::openai::CompletionClient;
use crate::prompt::build_prompt;
use crate::validate::validate_response;

/// Lifecycle of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Normalizing,
    Prompting,
    Modeling,
    Validating,
    Completed,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Normalizing => "normalizing",
            Self::Prompting => "prompting",
            Self::Modeling => "modeling",
            Self::Validating => "validating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct Progress<'a> {
    mail_id: &'a str,
    stage: Stage,
}

impl Progress<'_> {
    fn enter(&mut self, next: Stage) {
        tracing::debug!(mail_id = self.mail_id, from = %self.stage, to = %next, "stage transition");
        self.stage = next;
    }
}

/// `{mail_id}-{NN}` for the attachment at zero-based `index`
pub fn source_file_id(mail_id: &str, index: usize) -> String {
    format!("{mail_id}-{:02}", index + 1)
}

/// Process one request end to end
///
/// # Errors
///
/// - `ModelUnavailable` if the completion call fails; no partial result is
///   produced in that case
pub async fn process_request<C: CompletionClient>(
    config: &ServiceConfig,
    client: &C,
    request: ProcessingRequest,
) -> AppResult<ProcessResponse> {
    let ProcessingRequest {
        mail_id,
        attachments,
    } = request;
    let mut progress = Progress {
        mail_id: &mail_id,
        stage: Stage::Received,
    };
    tracing::info!(
        mail_id = %mail_id,
        attachments = attachments.len(),
        "processing request"
    );

    progress.enter(Stage::Normalizing);
    let mut contents = Vec::with_capacity(attachments.len());
    let mut failures = BTreeMap::new();
    for (idx, file) in attachments.into_iter().enumerate() {
        let id = source_file_id(&mail_id, idx);
        let filename = file.filename.clone();
        let content_type = file.content_type.clone();
        match normalize_off_runtime(file, id.clone(), config.max_attachment_bytes).await {
            Ok(content) => {
                tracing::debug!(source_file_id = %id, kind = ?content.kind, "attachment normalized");
                contents.push(content);
            }
            Err(e) => {
                tracing::warn!(
                    source_file_id = %id,
                    filename = %filename,
                    content_type = ?content_type,
                    "skipping attachment: {e}"
                );
                failures.insert(
                    id,
                    FileRecord::failed(FileError {
                        code: e.code().to_owned(),
                        message: e.to_string(),
                        filename,
                    }),
                );
            }
        }
    }

    progress.enter(Stage::Prompting);
    let prompt = build_prompt(&mail_id, &contents, Utc::now().date_naive());

    progress.enter(Stage::Modeling);
    let raw = match client.complete(&prompt).await {
        Ok(raw) => raw,
        Err(e) => {
            progress.enter(Stage::Failed);
            return Err(e);
        }
    };

    progress.enter(Stage::Validating);
    let validated = validate_response(&raw, &mail_id);
    let mut record = validated.record;
    reconcile_files(&mut record.files, &contents, failures);

    progress.enter(Stage::Completed);
    let (status, error) = match validated.malformed {
        Some(e) => (ResultStatus::Error, Some(e.to_string())),
        None => (ResultStatus::Success, None),
    };
    tracing::info!(
        mail_id = %mail_id,
        sent = contents.len(),
        files = record.files.len(),
        status = ?status,
        "request completed"
    );

    Ok(ProcessResponse {
        status: "completed".to_owned(),
        mail_id: mail_id.clone(),
        total_attachments: contents.len(),
        result: ExtractionResult {
            mail_id: mail_id.clone(),
            status,
            extracted_data: BTreeMap::from([(mail_id, record)]),
            error,
        },
    })
}

/// Run [`attachment::normalize`] on the blocking pool
///
/// PDF parsing and zip inflation are CPU-bound and must not stall the
/// runtime workers serving other connections.
async fn normalize_off_runtime(
    file: UploadedFile,
    source_file_id: String,
    max_bytes: usize,
) -> AppResult<ExtractedContent> {
    tokio::task::spawn_blocking(move || attachment::normalize(&file, &source_file_id, max_bytes))
        .await
        .map_err(|e| AppError::Internal(format!("attachment task failed: {e}")))?
}

/// Align the model's `files` map with what was actually submitted
///
/// Entries for ids that were sent are kept (defaults when the model omitted
/// them), ids the model invented are dropped, and failed attachments carry
/// their error annotation.
fn reconcile_files(
    files: &mut BTreeMap<String, FileRecord>,
    sent: &[ExtractedContent],
    failures: BTreeMap<String, FileRecord>,
) {
    files.retain(|id, _| {
        let known = sent.iter().any(|c| &c.source_file_id == id);
        if !known {
            tracing::debug!(source_file_id = %id, "dropping file entry with unknown id");
        }
        known
    });
    for content in sent {
        files.entry(content.source_file_id.clone()).or_default();
    }
    files.extend(failures);
}
