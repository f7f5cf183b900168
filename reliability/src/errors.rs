use thiserror::Error;
use table_store::StoreError;

/// Result alias for the reliability substrate.
pub type ReliabilityResult<T> = std::result::Result<T, ReliabilityError>;

#[derive(Debug, Error)]
pub enum ReliabilityError {
    /// The circuit for a downstream service is open; the caller must not
    /// attempt the call and should back off until `retry_after`.
    #[error("circuit breaker for {service} is open, retry after {retry_after_secs}s")]
    BreakerOpen {
        service: String,
        retry_after_secs: u64,
    },

    /// The caller exceeded its rate limit.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// A duplicate request is already being processed (idempotency conflict).
    #[error("request with fingerprint {0} is already in progress")]
    AlreadyPending(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
