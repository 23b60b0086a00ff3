//! Request, intermediate and response types
//!
//! The response side mirrors the extraction schema the model is asked to
//! produce. Response types deserialize leniently: a missing or wrong-typed key
//! falls back to its default without invalidating its siblings.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Default mail identifier when the caller does not provide one
pub const DEFAULT_MAIL_ID: &str = "mail_001";

/// One incoming `POST /process` call
#[derive(Debug, Clone)]
pub struct ProcessingRequest {
    /// Email identifier (defaults to [`DEFAULT_MAIL_ID`])
    pub mail_id: String,
    /// Attachments in submission order
    pub attachments: Vec<UploadedFile>,
}

/// Attachment as received from the multipart body
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Sanitized filename
    pub filename: String,
    /// Content type declared by the client, if any
    pub content_type: Option<String>,
    /// Raw bytes (truncated once the size limit is crossed)
    pub bytes: Vec<u8>,
    /// Set when the upload crossed the per-file limit while streaming
    pub oversized: bool,
}

/// Kind of payload produced by the attachment normalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Plain text embedded inline in the prompt
    Text,
    /// Base64 payload attached as a visual input
    Image,
}

/// Normalized attachment ready for prompting
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    /// `{mail_id}-{NN}` in submission order
    pub source_file_id: String,
    /// Sanitized filename
    pub filename: String,
    /// Text or image
    pub kind: ContentKind,
    /// MIME type of the payload (`text/plain` for text)
    pub media_type: String,
    /// Plain text or base64
    pub payload: String,
}

/// Urgency label attached to an email or file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, JsonSchema)]
pub enum Urgency {
    Low,
    Medium,
    High,
    #[default]
    Unknown,
}

impl Urgency {
    /// Parse a label case-insensitively; anything unrecognized is `Unknown`
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => Self::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for Urgency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(value.as_str().map_or(Self::Unknown, Self::parse))
    }
}

/// Extraction for a single mail
///
/// Serialized keys follow the extraction schema exactly (`Summary`,
/// `ActionItems`, `Urgency`, `files`, `calendar_add_details`). Additional keys
/// returned by the model are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MailRecord {
    /// One-paragraph summary of the email and its purpose
    #[serde(rename = "Summary", default, deserialize_with = "lenient::string")]
    pub summary: String,
    /// Actionable follow-ups for the recipient
    #[serde(rename = "ActionItems", default, deserialize_with = "lenient::string_list")]
    pub action_items: Vec<String>,
    /// Overall priority
    #[serde(rename = "Urgency", default)]
    pub urgency: Urgency,
    /// Per-attachment records keyed by source file id
    #[serde(default, deserialize_with = "lenient::file_map")]
    pub files: BTreeMap<String, FileRecord>,
    /// Calendar-event candidates
    #[serde(default, deserialize_with = "lenient::event_list")]
    pub calendar_add_details: Vec<CalendarEvent>,
    /// Any other fields the model returned at this level
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Extraction for a single attachment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FileRecord {
    /// Nature of the document (Invoice, Bill, Tax Notice, ...)
    #[serde(rename = "Type", default, deserialize_with = "lenient::string")]
    pub doc_type: String,
    /// Who sent or authored the attachment
    #[serde(default, deserialize_with = "lenient::string")]
    pub sender: String,
    /// When the attachment was received or dated
    #[serde(default, deserialize_with = "lenient::string")]
    pub received_date: String,
    /// Short summary
    #[serde(rename = "Summary", default, deserialize_with = "lenient::string")]
    pub summary: String,
    /// Detailed description
    #[serde(rename = "Details", default, deserialize_with = "lenient::string")]
    pub details: String,
    /// Relevant tags
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub tags: Vec<String>,
    /// Priority of this attachment
    #[serde(rename = "Urgency", default)]
    pub urgency: Urgency,
    /// Amount, when the document carries one
    #[serde(rename = "Amount", default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Value>,
    /// Payment details, when the document carries them
    #[serde(
        rename = "PaymentDetails",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub payment_details: Option<Value>,
    /// Set when the attachment could not be normalized
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    #[schemars(skip)]
    pub error: Option<FileError>,
    /// Any other fields the model returned for this file
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl FileRecord {
    /// Entry for an attachment that never reached the model
    pub fn failed(error: FileError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Per-file failure annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    /// Machine code (`unsupported_file_type`, `file_too_large`)
    pub code: String,
    /// Human-readable reason
    pub message: String,
    /// Original (sanitized) filename
    pub filename: String,
}

/// Calendar-event candidate, never committed to any calendar
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CalendarEvent {
    /// `YYYY-MM-DD`
    #[serde(default, deserialize_with = "lenient::string")]
    pub date: String,
    /// `HH:mm`
    #[serde(default, deserialize_with = "lenient::string")]
    pub time: String,
    /// Human-readable action
    #[serde(default, deserialize_with = "lenient::string")]
    pub action: String,
    /// Mail the event was derived from
    #[serde(default, deserialize_with = "lenient::string")]
    pub source_mail_id: String,
    /// Attachment the event was derived from, if any
    #[serde(default, deserialize_with = "lenient::optional_string")]
    pub source_file_id: Option<String>,
    /// Open key/value details (amount, reference, location, ...)
    #[serde(default, deserialize_with = "lenient::object")]
    pub execution_details: BTreeMap<String, Value>,
}

/// Outcome of the model stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Terminal artifact returned under `result`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Email identifier
    pub mail_id: String,
    /// `error` when the model output had to be replaced with defaults
    pub status: ResultStatus,
    /// Single entry keyed by `mail_id`
    pub extracted_data: BTreeMap<String, MailRecord>,
    /// Reason for `status = error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Envelope for a successful `POST /process`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResponse {
    /// Always `completed`
    pub status: String,
    /// Email identifier
    pub mail_id: String,
    /// Attachments normalized and sent to the model
    pub total_attachments: usize,
    /// Extraction result
    pub result: ExtractionResult,
}

/// Per-key fallbacks used by the response types
mod lenient {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::{CalendarEvent, FileRecord};

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => s,
            Value::Null => String::new(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            // Arrays/objects where a string belongs: keep them readable.
            other => other.to_string(),
        })
    }

    pub fn optional_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) if !s.trim().is_empty() => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    pub fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect(),
            Value::String(s) if !s.trim().is_empty() => vec![s],
            _ => Vec::new(),
        })
    }

    pub fn object<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, Value>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        })
    }

    pub fn file_map<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<BTreeMap<String, FileRecord>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Object(map) => map
                .into_iter()
                .map(|(id, v)| (id, serde_json::from_value(v).unwrap_or_default()))
                .collect(),
            _ => BTreeMap::new(),
        })
    }

    pub fn event_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<CalendarEvent>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => items
                .into_iter()
                .filter(Value::is_object)
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect(),
            _ => Vec::new(),
        })
    }
}
