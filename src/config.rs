//! Service configuration loaded once from the environment
//!
//! All settings are read at process start into an immutable [`ServiceConfig`]
//! that is shared with handlers via `Arc`. Nothing reads the environment at
//! request time.

use std::env;
use std::env::VarError;

use secrecy::SecretString;

use crate::errors::{AppError, AppResult};

/// Default per-attachment size limit (16MB)
pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 16 * 1024 * 1024;

/// Completion endpoint settings
///
/// The API key is stored using `SecretString` to prevent accidental logging.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Bearer key for the completion endpoint
    pub api_key: SecretString,
    /// Base URL, e.g. `https://api.openai.com/v1` (no trailing slash)
    pub base_url: String,
    /// Model identifier
    pub model: String,
    /// Completion token cap
    pub max_tokens: u32,
    /// Upper bound on the whole model call in milliseconds
    pub timeout_ms: u64,
}

/// Server-wide configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Listen port
    pub port: u16,
    /// Verbose logging toggle
    pub debug: bool,
    /// Per-file size limit in bytes
    pub max_attachment_bytes: usize,
    /// Whole multipart body limit in bytes
    pub max_request_bytes: usize,
    /// Completion endpoint settings
    pub model: ModelConfig,
}

impl ServiceConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `OPENAI_API_KEY` is missing or any optional
    /// variable is set to a malformed value.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// OPENAI_API_KEY=sk-...
    /// PORT=8080
    /// DEBUG=false
    /// OPENAI_MODEL=gpt-4o-mini
    /// MODEL_TIMEOUT_MS=120000
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let api_key = required_env("OPENAI_API_KEY")?;
        let base_url = optional_env("OPENAI_BASE_URL")?
            .unwrap_or_else(|| "https://api.openai.com/v1".to_owned());
        let model = optional_env("OPENAI_MODEL")?.unwrap_or_else(|| "gpt-4o-mini".to_owned());

        let max_attachment_bytes =
            parse_usize_env("MAX_ATTACHMENT_BYTES", DEFAULT_MAX_ATTACHMENT_BYTES)?;
        let max_request_bytes = parse_usize_env("MAX_REQUEST_BYTES", 64 * 1024 * 1024)?;
        if max_request_bytes < max_attachment_bytes {
            return Err(AppError::invalid(
                "MAX_REQUEST_BYTES must be at least MAX_ATTACHMENT_BYTES",
            ));
        }

        Ok(Self {
            port: parse_u16_env("PORT", 8080)?,
            debug: parse_bool_env("DEBUG", false)?,
            max_attachment_bytes,
            max_request_bytes,
            model: ModelConfig {
                api_key: SecretString::new(api_key.into()),
                base_url: base_url.trim_end_matches('/').to_owned(),
                model,
                max_tokens: parse_u32_env("OPENAI_MAX_TOKENS", 4000)?,
                timeout_ms: parse_u64_env("MODEL_TIMEOUT_MS", 120_000)?,
            },
        })
    }

    /// Default `tracing` directive when `RUST_LOG` is not set
    pub fn default_log_directive(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}

/// Read a required environment variable, returning error if missing or empty
fn required_env(key: &str) -> AppResult<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::InvalidInput(format!(
            "missing required environment variable {key}"
        ))),
    }
}

/// Read an optional environment variable; blank counts as unset
fn optional_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v.trim().to_owned())),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a boolean environment variable with flexible values
///
/// Accepts: `1`, `true`, `yes`, `y`, `on` (truthy) or `0`, `false`, `no`,
/// `n`, `off` (falsy). Case-insensitive. Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set to an unrecognized value.
fn parse_bool_env(key: &str, default: bool) -> AppResult<bool> {
    match optional_env(key)? {
        Some(v) => parse_bool_value(&v).ok_or_else(|| {
            AppError::InvalidInput(format!("invalid boolean environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a numeric environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but does not parse as `T`.
fn parse_num_env<T: std::str::FromStr>(key: &str, default: T, kind: &str) -> AppResult<T> {
    match optional_env(key)? {
        Some(v) => v.parse::<T>().map_err(|_| {
            AppError::InvalidInput(format!("invalid {kind} environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

fn parse_u16_env(key: &str, default: u16) -> AppResult<u16> {
    parse_num_env(key, default, "u16")
}

fn parse_u32_env(key: &str, default: u32) -> AppResult<u32> {
    parse_num_env(key, default, "u32")
}

fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    parse_num_env(key, default, "u64")
}

fn parse_usize_env(key: &str, default: usize) -> AppResult<usize> {
    parse_num_env(key, default, "usize")
}

#[cfg(test)]
pub(crate) fn test_config(base_url: &str) -> ServiceConfig {
    ServiceConfig {
        port: 0,
        debug: true,
        max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
        max_request_bytes: 64 * 1024 * 1024,
        model: ModelConfig {
            api_key: SecretString::new("test-key".into()),
            base_url: base_url.to_owned(),
            model: "gpt-4o-mini".to_owned(),
            max_tokens: 4000,
            timeout_ms: 2_000,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{ServiceConfig, parse_bool_value, test_config};

    #[test]
    fn parse_bool_value_accepts_common_truthy_and_falsy_values() {
        for truthy in ["1", "true", "TRUE", " yes ", "Y", "on"] {
            assert_eq!(parse_bool_value(truthy), Some(true));
        }

        for falsy in ["0", "false", "FALSE", " no ", "N", "off"] {
            assert_eq!(parse_bool_value(falsy), Some(false));
        }
    }

    #[test]
    fn parse_bool_value_rejects_unrecognized_values() {
        for invalid in ["", "2", "maybe", "enabled", "disabled"] {
            assert_eq!(parse_bool_value(invalid), None);
        }
    }

    #[test]
    fn debug_flag_only_changes_log_directive() {
        let mut cfg: ServiceConfig = test_config("http://localhost");
        assert_eq!(cfg.default_log_directive(), "debug");
        cfg.debug = false;
        assert_eq!(cfg.default_log_directive(), "info");
    }
}
