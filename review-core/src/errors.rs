//! Crate-wide error hierarchy for review-core.
//!
//! Goals:
//! - Single root `Error` for all public functions.
//! - Provider-aware mapping (401→Unauthorized, 429→RateLimited, 5xx→Server, etc.).
//! - No dynamic dispatch, no async-trait, ergonomic `?` via `From` impls.

use thiserror::Error;

/// Convenient alias for crate-wide results.
pub type MrResult<T> = Result<T, Error>;

/// Root error type for the review-core crate. Maps onto §7's taxonomy at
/// the `api` crate boundary (see `api::error_handler::AppError`).
#[derive(Debug, Error)]
pub enum Error {
    /// Git provider (GitLab/GitHub/Bitbucket) related failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Input validation errors (bad IDs, unsupported flavors, etc.).
    #[error("validation error: {0}")]
    Validation(String),

    /// Circuit breaker / rate limiter / idempotency failure from the shared
    /// reliability substrate.
    #[error(transparent)]
    Reliability(#[from] reliability::ReliabilityError),

    /// Table store failure not already wrapped by a reliability component.
    #[error(transparent)]
    Store(#[from] table_store::StoreError),

    /// LLM provider failure.
    #[error(transparent)]
    Ai(#[from] ai_llm_service::AiLlmError),

    /// Generic catch-all error when nothing else fits.
    #[error("other error: {0}")]
    Other(String),
}

/// Detailed provider-specific error used inside the Provider layer.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Unauthorized (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden (HTTP 403).
    #[error("forbidden")]
    Forbidden,

    /// Not found (HTTP 404).
    #[error("not found")]
    NotFound,

    /// Rate limited (HTTP 429).
    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Gateway/Server error (HTTP 5xx).
    #[error("server error: status {0}")]
    Server(u16),

    /// Other HTTP status (4xx/3xx) not covered above.
    #[error("http status error: {0}")]
    HttpStatus(u16),

    /// Timeout at transport level.
    #[error("timeout")]
    Timeout,

    /// Network/transport failure without status (DNS/connect/reset).
    #[error("network error: {0}")]
    Network(String),

    /// JSON deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Unexpected/invalid shape of provider response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Operation not supported by provider (placeholder for TODOs).
    #[error("unsupported provider operation")]
    Unsupported,
}

// ===== Conversions for `?` ergonomics =====

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Provider(ProviderError::from(e))
    }
}

impl From<git_platform::errors::GitContextEngineError> for Error {
    fn from(e: git_platform::errors::GitContextEngineError) -> Self {
        use git_platform::errors::GitContextEngineError as G;
        match e {
            G::Provider(p) => Error::Provider(ProviderError::from(p)),
            G::Cache(_) => Error::Other(e.to_string()),
            G::DiffParse(_) => Error::Other(e.to_string()),
            G::Config(_) => Error::Other(e.to_string()),
            G::Validation(msg) => Error::Validation(msg),
            G::Internal(msg) => Error::Other(msg),
        }
    }
}

impl From<git_platform::errors::GitContextEngineProviderError> for ProviderError {
    fn from(e: git_platform::errors::GitContextEngineProviderError) -> Self {
        use git_platform::errors::GitContextEngineProviderError as G;
        match e {
            G::Unauthorized => ProviderError::Unauthorized,
            G::Forbidden => ProviderError::Forbidden,
            G::NotFound => ProviderError::NotFound,
            G::RateLimited { retry_after_secs } => ProviderError::RateLimited { retry_after_secs },
            G::Server(code) => ProviderError::Server(code),
            G::HttpStatus(code) => ProviderError::HttpStatus(code),
            G::Timeout => ProviderError::Timeout,
            G::Network(s) => ProviderError::Network(s),
            G::InvalidResponse(s) => ProviderError::InvalidResponse(s),
            G::Unsupported => ProviderError::Unsupported,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return ProviderError::Timeout;
        }
        if let Some(status) = e.status() {
            let code = status.as_u16();
            return match code {
                401 => ProviderError::Unauthorized,
                403 => ProviderError::Forbidden,
                404 => ProviderError::NotFound,
                429 => ProviderError::RateLimited {
                    retry_after_secs: None,
                },
                500..=599 => ProviderError::Server(code),
                _ => ProviderError::HttpStatus(code),
            };
        }
        ProviderError::Network(e.to_string())
    }
}
