//! Narrow key/value table abstraction used by the reliability substrate and
//! the feedback harvester: a partition key, a row key, an opaque JSON column,
//! and an optional TTL. One in-process implementation is provided
//! (file-backed JSON, one file per row), mirroring the on-disk cache
//! conventions the rest of this workspace already uses under `code_data/`.
//!
//! A managed KV backend can be swapped in later behind the same
//! [`TableStore`] trait; any implementation whose I/O is actually blocking
//! MUST be offloaded via `tokio::task::spawn_blocking` at its call sites, as
//! [`FileTableStore`] itself does for filesystem access.

pub mod error;
pub mod file_store;

pub use error::{StoreError, StoreResult};

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

/// One stored row: the raw JSON column plus bookkeeping needed to expire it.
#[derive(Debug, Clone)]
pub struct Row {
    /// Opaque JSON payload.
    pub value: serde_json::Value,
    /// When the row was last written.
    pub written_at: DateTime<Utc>,
    /// When the row expires, if it has a TTL.
    pub expires_at: Option<DateTime<Utc>>,
}

/// A narrow, async key/value table with optional per-row TTL.
///
/// `partition` groups related rows (e.g. a repository slug or a UTC date);
/// `row_key` identifies a row within a partition (e.g. an idempotency
/// fingerprint or a PR id).
pub trait TableStore: Send + Sync {
    /// Inserts or overwrites a row. `ttl_seconds` of `None` means the row
    /// never expires.
    async fn put<T: Serialize + Send + Sync>(
        &self,
        table: &str,
        partition: &str,
        row_key: &str,
        value: &T,
        ttl_seconds: Option<i64>,
    ) -> StoreResult<()>;

    /// Reads a row, returning `None` if absent or expired.
    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        table: &str,
        partition: &str,
        row_key: &str,
    ) -> StoreResult<Option<T>>;

    /// Deletes a row if present. Never errors on a missing row.
    async fn delete(&self, table: &str, partition: &str, row_key: &str) -> StoreResult<()>;

    /// Lists all non-expired row keys in a partition.
    async fn list_keys(&self, table: &str, partition: &str) -> StoreResult<Vec<String>>;

    /// Lists all partitions that exist under a table, regardless of whether
    /// they currently hold any non-expired rows. Used by the feedback
    /// harvester to enumerate repositories it has stored review history or
    /// feedback for.
    async fn list_partitions(&self, table: &str) -> StoreResult<Vec<String>>;
}
