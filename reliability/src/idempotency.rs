//! Idempotency store: deduplicates concurrent/duplicate webhook deliveries
//! for the same `(repository, pr_id, source_commit_id)` fingerprint.
//!
//! Rows live 48h (`IDEMPOTENCY_TTL_SECS`), partitioned by the UTC calendar
//! date the fingerprint was first seen on. Status transitions are monotone:
//! `pending` → `{completed, failed}` only; a row is never moved back to
//! `pending`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use table_store::TableStore;

use crate::errors::ReliabilityResult;

const TABLE: &str = "idempotency";
pub const IDEMPOTENCY_TTL_SECS: i64 = 48 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdempotencyRow {
    status: IdempotencyStatus,
    started_at: chrono::DateTime<Utc>,
}

/// What the caller should do with a newly-arrived delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyOutcome {
    /// No prior row existed; the caller owns this delivery and must call
    /// [`IdempotencyStore::complete`] when done.
    Started,
    /// A row for this fingerprint is already `pending`; this is a duplicate
    /// in-flight delivery and must be coalesced (204/409, not re-processed).
    AlreadyPending,
    /// A row for this fingerprint already reached a terminal state.
    AlreadyFinished(IdempotencyStatus),
}

pub struct IdempotencyStore<S: TableStore> {
    store: S,
}

impl<S: TableStore> IdempotencyStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn partition(&self) -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }

    /// Attempts to claim `fingerprint` for processing. Only one caller ever
    /// observes [`IdempotencyOutcome::Started`] for a given fingerprint
    /// within its TTL window.
    pub async fn try_begin(&self, fingerprint: &str) -> ReliabilityResult<IdempotencyOutcome> {
        let partition = self.partition();
        if let Some(row) = self
            .store
            .get::<IdempotencyRow>(TABLE, &partition, fingerprint)
            .await?
        {
            return Ok(match row.status {
                IdempotencyStatus::Pending => IdempotencyOutcome::AlreadyPending,
                other => IdempotencyOutcome::AlreadyFinished(other),
            });
        }

        let row = IdempotencyRow {
            status: IdempotencyStatus::Pending,
            started_at: Utc::now(),
        };
        self.store
            .put(TABLE, &partition, fingerprint, &row, Some(IDEMPOTENCY_TTL_SECS))
            .await?;
        Ok(IdempotencyOutcome::Started)
    }

    /// Moves a `pending` fingerprint to a terminal state. Idempotent: calling
    /// this twice for the same fingerprint just overwrites the terminal
    /// status (never moves it back to pending).
    pub async fn complete(&self, fingerprint: &str, success: bool) -> ReliabilityResult<()> {
        let partition = self.partition();
        let row = IdempotencyRow {
            status: if success {
                IdempotencyStatus::Completed
            } else {
                IdempotencyStatus::Failed
            },
            started_at: Utc::now(),
        };
        self.store
            .put(TABLE, &partition, fingerprint, &row, Some(IDEMPOTENCY_TTL_SECS))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use table_store::file_store::FileTableStore;

    fn store() -> (IdempotencyStore<FileTableStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        (IdempotencyStore::new(FileTableStore::new(dir.path())), dir)
    }

    #[tokio::test]
    async fn test_first_delivery_starts() {
        let (store, _dir) = store();
        assert_eq!(
            store.try_begin("fp1").await.unwrap(),
            IdempotencyOutcome::Started
        );
    }

    #[tokio::test]
    async fn test_duplicate_delivery_while_pending_is_coalesced() {
        let (store, _dir) = store();
        store.try_begin("fp1").await.unwrap();
        assert_eq!(
            store.try_begin("fp1").await.unwrap(),
            IdempotencyOutcome::AlreadyPending
        );
    }

    #[tokio::test]
    async fn test_completed_fingerprint_reports_finished() {
        let (store, _dir) = store();
        store.try_begin("fp1").await.unwrap();
        store.complete("fp1", true).await.unwrap();
        assert_eq!(
            store.try_begin("fp1").await.unwrap(),
            IdempotencyOutcome::AlreadyFinished(IdempotencyStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_failed_delivery_is_also_terminal() {
        let (store, _dir) = store();
        store.try_begin("fp1").await.unwrap();
        store.complete("fp1", false).await.unwrap();
        assert_eq!(
            store.try_begin("fp1").await.unwrap(),
            IdempotencyOutcome::AlreadyFinished(IdempotencyStatus::Failed)
        );
    }
}
