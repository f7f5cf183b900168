//! Error types and validation helpers for `ai-llm-service`.
//!
//! This module defines the error taxonomy used across provider clients
//! (Ollama, OpenAI-compatible), the health checker, and config loading, plus
//! small reusable helpers for reading/validating environment variables.
//!
//! All error messages include the suffix `[AI LLM Service]` so that logs
//! and bubbled-up errors can be easily attributed to this library.

use reqwest::StatusCode;
use thiserror::Error;

use crate::config::llm_provider::LlmProvider;
use crate::services::ollama_service::OllamaError;

/// Root error type for every fallible operation in this crate.
#[derive(Debug, Error)]
pub enum AiLlmError {
    /// Configuration/env loading failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Provider-client failure (chat/completions or embeddings call).
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Health-probe failure.
    #[error(transparent)]
    Health(#[from] HealthError),

    /// Transport-level failure building or driving an HTTP client.
    #[error("[AI LLM Service] HTTP transport error: {0}")]
    HttpTransport(#[from] reqwest::Error),
}

impl From<OllamaError> for AiLlmError {
    fn from(err: OllamaError) -> Self {
        match err {
            OllamaError::Transport(e) => AiLlmError::HttpTransport(e),
            OllamaError::InvalidProvider => ProviderError::new(
                Provider::Ollama,
                ProviderErrorKind::InvalidProvider,
            )
            .into(),
            OllamaError::InvalidEndpoint(e) => {
                ProviderError::new(Provider::Ollama, ProviderErrorKind::InvalidEndpoint(e)).into()
            }
            OllamaError::HttpStatus {
                status,
                url,
                snippet,
            } => ProviderError::new(
                Provider::Ollama,
                ProviderErrorKind::HttpStatus(HttpError {
                    status,
                    url,
                    snippet,
                }),
            )
            .into(),
            OllamaError::Decode(e) => {
                ProviderError::new(Provider::Ollama, ProviderErrorKind::Decode(e)).into()
            }
        }
    }
}

/// Which backend a [`ProviderError`] or [`HealthError`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Local Ollama runtime.
    Ollama,
    /// OpenAI-compatible chat completions / embeddings API.
    OpenAI,
}

impl From<LlmProvider> for Provider {
    fn from(p: LlmProvider) -> Self {
        match p {
            LlmProvider::Ollama => Provider::Ollama,
            LlmProvider::OpenAI => Provider::OpenAI,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::Ollama => write!(f, "ollama"),
            Provider::OpenAI => write!(f, "openai"),
        }
    }
}

/// Non-2xx HTTP response captured from an upstream provider.
#[derive(Debug, Clone)]
pub struct HttpError {
    /// The response status code.
    pub status: StatusCode,
    /// The request URL.
    pub url: String,
    /// A truncated snippet of the response body, for diagnostics.
    pub snippet: String,
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "HTTP {} from {}: {}",
            self.status, self.url, self.snippet
        )
    }
}

/// The specific failure mode of a provider call, independent of which
/// provider produced it.
#[derive(Debug)]
pub enum ProviderErrorKind {
    /// The config's provider did not match the client being constructed.
    InvalidProvider,
    /// The provider requires an API key and none was configured.
    MissingApiKey,
    /// The configured endpoint is empty or missing an http(s) scheme.
    InvalidEndpoint(String),
    /// Upstream responded with a non-2xx status.
    HttpStatus(HttpError),
    /// The response body could not be decoded into the expected shape.
    Decode(String),
    /// A successful response carried no usable choices/results.
    EmptyChoices,
}

/// A provider-attributed failure from a chat/completions or embeddings call.
#[derive(Debug, Error)]
#[error("[AI LLM Service] {provider} provider error: {kind}")]
pub struct ProviderError {
    /// Which backend produced the error.
    pub provider: Provider,
    /// The specific failure.
    pub kind: ProviderErrorKind,
}

impl ProviderError {
    /// Builds a new provider error.
    pub fn new(provider: Provider, kind: ProviderErrorKind) -> Self {
        Self { provider, kind }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderErrorKind::InvalidProvider => write!(f, "invalid provider for this client"),
            ProviderErrorKind::MissingApiKey => write!(f, "missing API key"),
            ProviderErrorKind::InvalidEndpoint(e) => write!(f, "invalid endpoint: {e}"),
            ProviderErrorKind::HttpStatus(e) => write!(f, "{e}"),
            ProviderErrorKind::Decode(e) => write!(f, "failed to decode response: {e}"),
            ProviderErrorKind::EmptyChoices => write!(f, "response had no usable choices"),
        }
    }
}

/// A failure from a `/health` probe against a provider.
#[derive(Debug, Error)]
pub enum HealthError {
    /// Upstream responded with a non-2xx status during the probe.
    #[error("[AI LLM Service] health probe received {0}")]
    HttpStatus(HttpError),
    /// The probe response could not be decoded.
    #[error("[AI LLM Service] failed to decode health probe response: {0}")]
    Decode(String),
}

/// Convenient result alias for config and runtime operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Error enum for environment/config-driven setup.
///
/// Keep this focused: only errors that realistically happen at config
/// load/validation time. Extend conservatively as needs arise.
///
/// All variants include `[AI LLM Service]` in their messages.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing or empty.
    #[error("[AI LLM Service] missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// A number failed to parse (like ports, limits, timeouts).
    #[error("[AI LLM Service] invalid number in {var}: {reason}")]
    InvalidNumber {
        /// Variable name (e.g., `LLM_MAX_TOKENS`, `OLLAMA_PORT`).
        var: &'static str,
        /// Human-readable reason (e.g., `expected u32`).
        reason: &'static str,
    },

    /// Unsupported provider in `LLM_KIND`.
    #[error("[AI LLM Service] unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Value had the wrong format (e.g., invalid URL).
    #[error("[AI LLM Service] invalid format in {var}: {reason}")]
    InvalidFormat {
        /// Variable name (e.g., `OLLAMA_URL`).
        var: &'static str,
        /// Explanation (e.g., `must start with http:// or https://`).
        reason: &'static str,
    },

    /// A numeric field was outside of the allowed range.
    #[error("[AI LLM Service] {field} is out of range: {detail}")]
    OutOfRange {
        /// Field name (e.g., `temperature`).
        field: &'static str,
        /// Description of the expected range (e.g., `expected 0.0..=1.0`).
        detail: &'static str,
    },

    /// Model name was empty or invalid.
    #[error("[AI LLM Service] model name must not be empty")]
    EmptyModel,

    /// Stop sequences contained one or more empty strings.
    #[error("[AI LLM Service] stop sequences must not contain empty strings")]
    InvalidStopSequence,
}

/* ------------------------ Env helpers ------------------------ */

/// Fetches a required, non-empty environment variable.
///
/// # Errors
/// Returns [`ConfigError::MissingVar`] if the variable is absent or empty.
pub fn must_env(name: &'static str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingVar(name)),
    }
}

/// Parses an optional `u32` from env (`Ok(None)` if unset/empty).
///
/// # Errors
/// Returns [`ConfigError::InvalidNumber`] if the variable is set but not a valid `u32`.
pub fn env_opt_u32(name: &'static str) -> Result<Option<u32>> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => {
            v.parse::<u32>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidNumber {
                    var: name,
                    reason: "expected u32",
                })
        }
        _ => Ok(None),
    }
}

/* --------------------- Validation helpers --------------------- */

/// Validates that an HTTP endpoint starts with `http://` or `https://`.
///
/// # Errors
/// Returns [`ConfigError::InvalidFormat`] when the string does not start
/// with a valid HTTP scheme.
pub fn validate_http_endpoint(var: &'static str, value: &str) -> Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidFormat {
            var,
            reason: "must start with http:// or https://",
        })
    }
}

/// Validates that a floating-point value lies within an inclusive range.
///
/// Useful for parameters like `temperature` (e.g., `0.0..=2.0`) or
/// `top_p` (`0.0..=1.0`).
///
/// # Errors
/// Returns [`ConfigError::OutOfRange`] if `value` is outside `[min, max]`.
pub fn validate_range_f32(field: &'static str, value: f32, min: f32, max: f32) -> Result<()> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            detail: "expected value in inclusive range",
        })
    }
}

/// Ensures that a list of stop sequences is non-empty and contains no empty strings.
///
/// # Errors
/// Returns [`ConfigError::InvalidStopSequence`] if any element is an empty string.
pub fn validate_stop_sequences<S>(stops: &[S]) -> Result<()>
where
    S: AsRef<str>,
{
    if stops.iter().any(|s| s.as_ref().is_empty()) {
        Err(ConfigError::InvalidStopSequence)
    } else {
        Ok(())
    }
}

/// Truncates a response body to a short diagnostic snippet (240 chars).
pub fn make_snippet(body: &str) -> String {
    body.chars().take(240).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_snippet_truncates_long_body() {
        let body = "x".repeat(1000);
        assert_eq!(make_snippet(&body).len(), 240);
    }

    #[test]
    fn test_make_snippet_keeps_short_body_whole() {
        assert_eq!(make_snippet("short"), "short");
    }

    #[test]
    fn test_validate_stop_sequences_rejects_empty_entry() {
        let stops = ["ok", ""];
        assert!(validate_stop_sequences(&stops).is_err());
    }
}
