//! Model response validation
//!
//! Turns free-form completion text into a typed [`MailRecord`]. Parsing is
//! tolerant: markdown fences and surrounding prose are stripped, and any key
//! that is missing or mistyped falls back to its default on its own. When the
//! text cannot be parsed at all, a default record is returned together with a
//! `ResponseMalformed` error for the caller to annotate.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::errors::AppError;
use crate::models::MailRecord;

/// Top-level key carrying calendar candidates
pub const CALENDAR_KEY: &str = "calendar_add_details";

static CODE_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)```").ok());

/// Validated model output
#[derive(Debug)]
pub struct ValidatedResponse {
    /// Typed record with per-key defaults applied
    pub record: MailRecord,
    /// Set when the completion was unusable and defaults were substituted
    pub malformed: Option<AppError>,
}

/// Validate raw completion text for `mail_id`
///
/// Never fails: unusable output yields the default record plus a
/// `ResponseMalformed` annotation.
pub fn validate_response(raw: &str, mail_id: &str) -> ValidatedResponse {
    match parse_completion(raw).and_then(|value| locate_record(value, mail_id)) {
        Ok(record) => ValidatedResponse {
            record,
            malformed: None,
        },
        Err(e) => {
            tracing::warn!(mail_id, "substituting default extraction: {e}");
            ValidatedResponse {
                record: MailRecord::default(),
                malformed: Some(e),
            }
        }
    }
}

/// Parse completion text as JSON
///
/// Tried in order: the trimmed reply, the first fenced code block, then the
/// span from the first `{` to the last `}` of the reply.
fn parse_completion(raw: &str) -> Result<Value, AppError> {
    let first_err = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    if let Some(value) = fenced_block(raw).and_then(|f| serde_json::from_str::<Value>(f).ok()) {
        return Ok(value);
    }

    let candidate = largest_object_span(raw)
        .ok_or_else(|| AppError::ResponseMalformed(format!("no JSON object found: {first_err}")))?;
    serde_json::from_str(candidate)
        .map_err(|e| AppError::ResponseMalformed(format!("invalid JSON: {e}")))
}

/// Trimmed contents of the first fenced code block, if any
fn fenced_block(raw: &str) -> Option<&str> {
    CODE_FENCE
        .as_ref()
        .and_then(|re| re.captures(raw))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Span from the first `{` to the last `}`
fn largest_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Pick the record for `mail_id` out of the parsed completion
///
/// Accepted shapes, in order: `{mail_id: {...}}`, a root object that is
/// itself the record (has `Summary`), or a root holding exactly one object
/// under some other key. A top-level `calendar_add_details` is folded into
/// the record when the record has none of its own. Anything else, including a
/// record that is not an object, is malformed.
fn locate_record(value: Value, mail_id: &str) -> Result<MailRecord, AppError> {
    let Value::Object(mut root) = value else {
        return Err(AppError::ResponseMalformed(
            "completion is not a JSON object".to_owned(),
        ));
    };

    let calendar = root.remove(CALENDAR_KEY);
    let mut record = if let Some(found) = root.remove(mail_id) {
        found
    } else if root.contains_key("Summary") {
        Value::Object(root)
    } else {
        let mut objects = root.into_iter().filter(|(_, v)| v.is_object());
        match (objects.next(), objects.next()) {
            (Some((key, only)), None) => {
                tracing::debug!(mail_id, returned_key = %key, "model keyed record differently");
                only
            }
            (None, _) => {
                return Err(AppError::ResponseMalformed(format!(
                    "completion has no record for {mail_id}"
                )));
            }
            (Some(_), Some(_)) => {
                return Err(AppError::ResponseMalformed(format!(
                    "completion has several records but none for {mail_id}"
                )));
            }
        }
    };
    if !record.is_object() {
        return Err(AppError::ResponseMalformed(format!(
            "record for {mail_id} is not a JSON object"
        )));
    }

    if let (Value::Object(fields), Some(calendar)) = (&mut record, calendar) {
        let has_own = fields
            .get(CALENDAR_KEY)
            .and_then(Value::as_array)
            .is_some_and(|events| !events.is_empty());
        if !has_own {
            fields.insert(CALENDAR_KEY.to_owned(), calendar);
        }
    }

    serde_json::from_value(record)
        .map_err(|e| AppError::ResponseMalformed(format!("record does not match schema: {e}")))
}
