//! Prompt assembly
//!
//! Builds one structured-extraction prompt per request. Extracted text is
//! embedded inline; image payloads travel as separate visual inputs attached
//! to the same model call.

use chrono::NaiveDate;
use schemars::schema_for;

use crate::models::{ContentKind, ExtractedContent, MailRecord};

const SYSTEM_PROMPT: &str =
    "You are a helpful assistant for email and document data extraction.";

const EXTRACTION_INSTRUCTIONS: &str = r#"### You are an expert assistant for extracting structured data from emails and attachments.

Given an email (with or without attachments), analyze the content and return a JSON response strictly conforming to the following schema.

## Standard Response Format

{
  "MAIL_ID": {
    "Summary": "One-paragraph summary of the email and its purpose.",
    "ActionItems": ["Actionable items for the user based on the email and its attachments."],
    "Urgency": "Low | Medium | High",
    "files": {
      "FILE_ID": {
        "Type": "Nature of the document, e.g. Invoice, Bill, Tax Notice",
        "sender": "Who sent or authored the attachment",
        "received_date": "When the attachment was received or dated",
        "Summary": "Short summary of the attachment",
        "Details": "Detailed description of the attachment",
        "tags": ["relevant", "tags"],
        "Urgency": "Low | Medium | High",
        "Amount": "Amount if present",
        "PaymentDetails": { "any": "payment fields present in the document" }
      }
    },
    "calendar_add_details": [
      {
        "date": "YYYY-MM-DD",
        "time": "HH:mm",
        "action": "Human-readable description of the event or action",
        "source_mail_id": "MAIL_ID",
        "source_file_id": "FILE_ID or null when not derived from an attachment",
        "execution_details": { "amount": "...", "reference": "...", "location": "...", "meeting_link": "..." }
      }
    ]
  }
}

## Rules

- Use the exact mail id given below as the top-level key and the exact file ids given below as keys of "files".
- Summary, ActionItems, Urgency, files and calendar_add_details must always be present.
- Every file entry must contain Type, sender, received_date, Summary, Details, tags and Urgency. Include Amount and PaymentDetails when available, and any other relevant fields found in the document using the source field name and data type.
- If no data is available for a field use "NA", null, or an empty array/object as appropriate.
- Always include calendar_add_details as an array, even if empty.
- Never output text or explanation outside the JSON."#;

/// Image payload sent alongside the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualInput {
    /// Source file id the model should use as the key under `files`
    pub source_file_id: String,
    /// Sanitized filename
    pub filename: String,
    /// MIME type for the data URL
    pub media_type: String,
    /// Base64 bytes
    pub data_base64: String,
}

/// Fully assembled prompt for one model call
#[derive(Debug, Clone)]
pub struct Prompt {
    /// System role message
    pub system: String,
    /// Fixed extraction instructions including the field schema
    pub instructions: String,
    /// Mail-specific content: id, attachment list, inline text
    pub body: String,
    /// Images attached to the same call, in submission order
    pub visual_inputs: Vec<VisualInput>,
}

/// Assemble the prompt for `mail_id` and its normalized attachments
///
/// `today` anchors relative dates ("next Friday") for calendar candidates.
pub fn build_prompt(mail_id: &str, contents: &[ExtractedContent], today: NaiveDate) -> Prompt {
    let mut body = format!("Mail ID: {mail_id}\nToday's date: {today}\n\n");
    let mut visual_inputs = Vec::new();

    if contents.is_empty() {
        body.push_str(
            "This email has no attachments. Analyze it based on the mail ID alone and still \
             return every field of the schema, with \"files\" as an empty object {} and any \
             attachment-dependent fields empty.\n",
        );
    } else {
        body.push_str(&format!(
            "This email has {} attachment(s):\n\n",
            contents.len()
        ));
        for (idx, content) in contents.iter().enumerate() {
            body.push_str(&format!(
                "Attachment {}: {} (file id: {})\n",
                idx + 1,
                content.filename,
                content.source_file_id
            ));
            match content.kind {
                ContentKind::Text => {
                    body.push_str(&format!("Content:\n{}\n\n", content.payload));
                }
                ContentKind::Image => {
                    body.push_str("Content: provided as a separate visual input.\n\n");
                    visual_inputs.push(VisualInput {
                        source_file_id: content.source_file_id.clone(),
                        filename: content.filename.clone(),
                        media_type: content.media_type.clone(),
                        data_base64: content.payload.clone(),
                    });
                }
            }
        }
    }

    Prompt {
        system: SYSTEM_PROMPT.to_owned(),
        instructions: instructions(),
        body,
        visual_inputs,
    }
}

/// Fixed instructions plus the JSON Schema of a mail entry
fn instructions() -> String {
    let schema = serde_json::to_string_pretty(&schema_for!(MailRecord)).unwrap_or_default();
    if schema.is_empty() {
        return EXTRACTION_INSTRUCTIONS.to_owned();
    }
    format!(
        "{EXTRACTION_INSTRUCTIONS}\n\n## JSON Schema of each mail entry\n\n{schema}"
    )
}
