//! Completion endpoint client
//!
//! The pipeline talks to the model through [`CompletionClient`] so request
//! handling can be exercised without network access. [`OpenAiClient`] is the
//! production implementation for an OpenAI-compatible chat-completions API.
//! A single attempt is made per request; there is no retry.

use std::future::Future;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::ModelConfig;
use crate::errors::{AppError, AppResult};
use crate::prompt::{Prompt, VisualInput};
use crate::util::{duration_ms, truncate_chars};

/// Longest upstream error body echoed into an error message
const MAX_UPSTREAM_ERROR_CHARS: usize = 300;

/// Sends an assembled prompt to a model and returns the raw completion text
pub trait CompletionClient: Send + Sync + 'static {
    /// Submit `prompt` and return the completion text
    ///
    /// # Errors
    ///
    /// `ModelUnavailable` on network failure, timeout, rejected credentials,
    /// or an upstream response without message content.
    fn complete(&self, prompt: &Prompt) -> impl Future<Output = AppResult<String>> + Send;
}

/// OpenAI-compatible chat-completions client
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
}

impl OpenAiClient {
    /// Build a client from configuration
    ///
    /// The configured timeout bounds the whole call, connect through body.
    ///
    /// # Errors
    ///
    /// - `Internal` if the HTTP client cannot be constructed
    pub fn new(config: &ModelConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("mail-extract-rs/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

impl CompletionClient for OpenAiClient {
    fn complete(&self, prompt: &Prompt) -> impl Future<Output = AppResult<String>> + Send {
        async move { self.send_completion(prompt).await }
    }
}

impl OpenAiClient {
    async fn send_completion(&self, prompt: &Prompt) -> AppResult<String> {
        let started = Instant::now();
        let body = build_chat_request(&self.model, self.max_tokens, prompt);
        tracing::debug!(
            model = %self.model,
            visual_inputs = prompt.visual_inputs.len(),
            "sending completion request"
        );

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AppError::ModelUnavailable(format!(
                "completion endpoint rejected credentials ({status})"
            )));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::ModelUnavailable(format!(
                "completion endpoint returned {status}: {}",
                truncate_chars(text, MAX_UPSTREAM_ERROR_CHARS)
            )));
        }

        let completion: ChatCompletion = resp.json().await.map_err(transport_error)?;
        let text = completion_text(completion)?;
        tracing::info!(
            model = %self.model,
            elapsed_ms = duration_ms(started),
            completion_chars = text.len(),
            "completion received"
        );
        Ok(text)
    }
}

/// Build the chat-completions request body
///
/// Message order: system, extraction instructions, one message per visual
/// input, then the mail-specific body.
pub fn build_chat_request(model: &str, max_tokens: u32, prompt: &Prompt) -> Value {
    let mut messages = vec![
        json!({ "role": "system", "content": prompt.system }),
        json!({ "role": "user", "content": prompt.instructions }),
    ];
    messages.extend(prompt.visual_inputs.iter().map(visual_message));
    messages.push(json!({ "role": "user", "content": prompt.body }));

    json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
        "temperature": 0,
        "response_format": { "type": "json_object" },
    })
}

/// Images go as `image_url` parts; scanned PDFs go as `file` parts.
fn visual_message(input: &VisualInput) -> Value {
    let data_url = format!("data:{};base64,{}", input.media_type, input.data_base64);
    let part = if input.media_type.starts_with("image/") {
        json!({ "type": "image_url", "image_url": { "url": data_url } })
    } else {
        json!({ "type": "file", "file": { "filename": input.filename, "file_data": data_url } })
    };

    json!({
        "role": "user",
        "content": [
            {
                "type": "text",
                "text": format!("Attachment {}: {}", input.source_file_id, input.filename),
            },
            part,
        ],
    })
}

fn transport_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::ModelUnavailable("completion request timed out".to_owned())
    } else if e.is_connect() {
        AppError::ModelUnavailable(format!("could not connect to completion endpoint: {e}"))
    } else if e.is_decode() {
        AppError::ModelUnavailable(format!("unexpected completion response: {e}"))
    } else {
        AppError::ModelUnavailable(format!("completion request failed: {e}"))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<PromptUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromptUsage {
    total_tokens: u64,
}

fn completion_text(completion: ChatCompletion) -> AppResult<String> {
    if let Some(usage) = &completion.usage {
        tracing::debug!(total_tokens = usage.total_tokens, "completion usage");
    }
    completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| {
            AppError::ModelUnavailable("completion response had no message content".to_owned())
        })
}
