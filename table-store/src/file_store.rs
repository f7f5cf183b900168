use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use tracing::{debug, warn};

use crate::{StoreError, StoreResult, TableStore};

/// File-backed [`TableStore`]: one JSON file per row, laid out as
/// `<root>/<table>/<partition>/<row_key>.json`.
///
/// Mirrors the on-disk JSON cache convention already used for MR/PR diff
/// bundles elsewhere in this workspace (one hashed file per cached entity,
/// sanitized path segments, root directory overridable via env/constructor).
#[derive(Debug, Clone)]
pub struct FileTableStore {
    root: PathBuf,
}

impl FileTableStore {
    /// Creates a store rooted at `root` (created lazily on first write).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a store rooted at `code_data/table_store`, or
    /// `$REVIEWBOT_STORE_DIR` if set.
    pub fn from_env_or_default() -> Self {
        let root = std::env::var("REVIEWBOT_STORE_DIR")
            .unwrap_or_else(|_| "code_data/table_store".to_string());
        Self::new(root)
    }

    fn row_path(&self, table: &str, partition: &str, row_key: &str) -> StoreResult<PathBuf> {
        let table = sanitize(table)?;
        let partition = sanitize(partition)?;
        let row_key = sanitize(row_key)?;
        Ok(self
            .root
            .join(table)
            .join(partition)
            .join(format!("{row_key}.json")))
    }

    fn partition_dir(&self, table: &str, partition: &str) -> StoreResult<PathBuf> {
        let table = sanitize(table)?;
        let partition = sanitize(partition)?;
        Ok(self.root.join(table).join(partition))
    }

    fn table_dir(&self, table: &str) -> StoreResult<PathBuf> {
        let table = sanitize(table)?;
        Ok(self.root.join(table))
    }
}

/// Rejects empty keys and path traversal; replaces path separators with `_`
/// so partition/row keys containing `/` (e.g. `org/repo`) stay within one
/// directory segment.
fn sanitize(segment: &str) -> StoreResult<String> {
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(StoreError::InvalidKey(segment.to_string()));
    }
    Ok(segment.replace(['/', '\\'], "_"))
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StoredRow {
    value: serde_json::Value,
    written_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl TableStore for FileTableStore {
    async fn put<T: Serialize + Send + Sync>(
        &self,
        table: &str,
        partition: &str,
        row_key: &str,
        value: &T,
        ttl_seconds: Option<i64>,
    ) -> StoreResult<()> {
        let path = self.row_path(table, partition, row_key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let now = Utc::now();
        let row = StoredRow {
            value: serde_json::to_value(value)?,
            written_at: now,
            expires_at: ttl_seconds.map(|s| now + chrono::Duration::seconds(s)),
        };

        let bytes = serde_json::to_vec(&row)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(table, partition, row_key, ttl_seconds = ?ttl_seconds, "table-store: row written");
        Ok(())
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        table: &str,
        partition: &str,
        row_key: &str,
    ) -> StoreResult<Option<T>> {
        let path = self.row_path(table, partition, row_key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let row: StoredRow = serde_json::from_slice(&bytes)?;
        if let Some(expires_at) = row.expires_at {
            if expires_at <= Utc::now() {
                debug!(table, partition, row_key, "table-store: row expired, treating as absent");
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }
        }

        Ok(Some(serde_json::from_value(row.value)?))
    }

    async fn delete(&self, table: &str, partition: &str, row_key: &str) -> StoreResult<()> {
        let path = self.row_path(table, partition, row_key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_keys(&self, table: &str, partition: &str) -> StoreResult<Vec<String>> {
        let dir = self.partition_dir(table, partition)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<StoredRow>(&bytes) {
                    Ok(row) if row.expires_at.is_none_or(|e| e > Utc::now()) => {
                        keys.push(stem.to_string());
                    }
                    Ok(_) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "table-store: skipping unreadable row during listing"),
                },
                Err(_) => continue,
            }
        }

        Ok(keys)
    }

    async fn list_partitions(&self, table: &str) -> StoreResult<Vec<String>> {
        let dir = self.table_dir(table)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut partitions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    partitions.push(name.to_string());
                }
            }
        }

        Ok(partitions)
    }
}

/// Builds the canonical JSON envelope a row would be stored as, for tests
/// and diagnostics that need to inspect the on-disk shape directly.
#[allow(dead_code)]
fn envelope(value: &serde_json::Value, written_at: DateTime<Utc>) -> serde_json::Value {
    json!({ "value": value, "written_at": written_at })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        n: u32,
    }

    fn store() -> (FileTableStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        (FileTableStore::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn test_put_then_get_round_trips() {
        let (store, _dir) = store();
        store
            .put("idempotency", "2026-07-30", "fp1", &Sample { n: 7 }, None)
            .await
            .unwrap();

        let got: Option<Sample> = store
            .get("idempotency", "2026-07-30", "fp1")
            .await
            .unwrap();
        assert_eq!(got, Some(Sample { n: 7 }));
    }

    #[tokio::test]
    async fn test_get_missing_row_returns_none() {
        let (store, _dir) = store();
        let got: Option<Sample> = store.get("idempotency", "2026-07-30", "nope").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_expired_row_is_treated_as_absent() {
        let (store, _dir) = store();
        store
            .put("cache", "repo", "k1", &Sample { n: 1 }, Some(-1))
            .await
            .unwrap();

        let got: Option<Sample> = store.get("cache", "repo", "k1").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_list_keys_excludes_expired_rows() {
        let (store, _dir) = store();
        store
            .put("cache", "repo", "live", &Sample { n: 1 }, Some(3600))
            .await
            .unwrap();
        store
            .put("cache", "repo", "dead", &Sample { n: 2 }, Some(-1))
            .await
            .unwrap();

        let mut keys = store.list_keys("cache", "repo").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["live".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_on_missing_row() {
        let (store, _dir) = store();
        store.delete("cache", "repo", "never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_partitions_lists_directories_under_table() {
        let (store, _dir) = store();
        store.put("reviewhistory", "org/repo-a", "1", &Sample { n: 1 }, None).await.unwrap();
        store.put("reviewhistory", "org/repo-b", "2", &Sample { n: 2 }, None).await.unwrap();

        let mut partitions = store.list_partitions("reviewhistory").await.unwrap();
        partitions.sort();
        assert_eq!(partitions, vec!["org_repo-a".to_string(), "org_repo-b".to_string()]);
    }

    #[tokio::test]
    async fn test_list_partitions_on_missing_table_returns_empty() {
        let (store, _dir) = store();
        assert!(store.list_partitions("nope").await.unwrap().is_empty());
    }

    #[test]
    fn test_sanitize_rejects_empty_and_dot_segments() {
        assert!(sanitize("").is_err());
        assert!(sanitize(".").is_err());
        assert!(sanitize("..").is_err());
        assert!(sanitize("org/repo").is_ok());
    }
}
