//! Content-addressed response cache for AI review output: keyed by a
//! SHA-256 hash of the reviewed content, partitioned by repository, with a
//! fixed 3-day TTL. Writes are bounded to `CACHE_MAX_WRITES_PER_MINUTE` via
//! a simple token bucket so a runaway caller cannot flood the backing store.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tokio::time::timeout;
use table_store::TableStore;
use tracing::warn;

use crate::errors::{ReliabilityError, ReliabilityResult};

const TABLE: &str = "responsecache";
pub const CACHE_TTL_SECS: i64 = 3 * 24 * 3600;
pub const CACHE_MAX_WRITES_PER_MINUTE: usize = 100;
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ResponseCache<S: TableStore> {
    store: S,
    write_times: Mutex<VecDeque<Instant>>,
}

impl<S: TableStore> ResponseCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_times: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        repository: &str,
        content_hash: &str,
    ) -> ReliabilityResult<Option<T>> {
        Ok(self.store.get(TABLE, repository, content_hash).await?)
    }

    /// Writes `value` under `content_hash`, subject to the per-minute write
    /// budget and a 5s write timeout. Silently drops the write (logging a
    /// warning) when over budget or timed out — a cache miss next time is
    /// harmless, unlike blocking the review pipeline on cache I/O.
    pub async fn put<T: Serialize + Send + Sync>(
        &self,
        repository: &str,
        content_hash: &str,
        value: &T,
    ) -> ReliabilityResult<()> {
        if !self.allow_write().await {
            warn!(repository, content_hash, "response cache: write budget exceeded, dropping write");
            return Ok(());
        }

        let fut = self
            .store
            .put(TABLE, repository, content_hash, value, Some(CACHE_TTL_SECS));

        match timeout(WRITE_TIMEOUT, fut).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ReliabilityError::from(e)),
            Err(_) => {
                warn!(repository, content_hash, "response cache: write timed out, dropping");
                Ok(())
            }
        }
    }

    async fn allow_write(&self) -> bool {
        let mut times = self.write_times.lock().await;
        let now = Instant::now();
        while let Some(&front) = times.front() {
            if now.duration_since(front) > Duration::from_secs(60) {
                times.pop_front();
            } else {
                break;
            }
        }
        if times.len() >= CACHE_MAX_WRITES_PER_MINUTE {
            return false;
        }
        times.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use table_store::file_store::FileTableStore;

    fn cache() -> (ResponseCache<FileTableStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        (ResponseCache::new(FileTableStore::new(dir.path())), dir)
    }

    #[tokio::test]
    async fn test_cache_miss_returns_none() {
        let (cache, _dir) = cache();
        let got: Option<String> = cache.get("org/repo", "deadbeef").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_put_then_get_round_trips() {
        let (cache, _dir) = cache();
        cache
            .put("org/repo", "deadbeef", &"cached review".to_string())
            .await
            .unwrap();
        let got: Option<String> = cache.get("org/repo", "deadbeef").await.unwrap();
        assert_eq!(got, Some("cached review".to_string()));
    }

    #[tokio::test]
    async fn test_write_budget_drops_excess_writes_without_erroring() {
        let (cache, _dir) = cache();
        for i in 0..CACHE_MAX_WRITES_PER_MINUTE + 5 {
            let hash = format!("hash-{i}");
            cache.put("org/repo", &hash, &i).await.unwrap();
        }
        let got: Option<i32> = cache
            .get("org/repo", &format!("hash-{}", CACHE_MAX_WRITES_PER_MINUTE + 4))
            .await
            .unwrap();
        assert_eq!(got, None);
    }
}
