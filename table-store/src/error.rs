use thiserror::Error;

/// Result alias for table-store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors produced by a [`crate::TableStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table-store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("table-store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("table-store invalid key: {0}")]
    InvalidKey(String),
}
