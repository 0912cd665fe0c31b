//! State persistence service for ledger synchronization.
//!
//! This module provides the `StatePersistenceService`, which restores the resumption cursor at
//! the start of a run and saves the ledger and the new cursor at the end. It uses repository
//! traits so the file-backed stores can be swapped for in-memory ones in tests.
//!
//! The ledger is written before the cursor: a crash in between re-syncs the range on the next run
//! and the id-keyed upsert absorbs the duplicates.

use crate::sync::repositories::{
    CursorRepository, FileCursorRepository, FileLedgerRepository, InMemoryCursorRepository,
    InMemoryLedgerRepository, LedgerRepository, StoredLedger,
};
use crate::sync::types::SyncResult;
use crate::sync::SyncError;

use std::path::PathBuf;
use tracing::{debug, info};

/// Service for managing state persistence operations.
pub struct StatePersistenceService {
    cursor_repo: Box<dyn CursorRepository>,
    ledger_repo: Box<dyn LedgerRepository>,
}

impl StatePersistenceService {
    /// File-backed persistence under `data_dir`.
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            cursor_repo: Box::new(FileCursorRepository::new(data_dir.clone())),
            ledger_repo: Box::new(FileLedgerRepository::new(data_dir)),
        }
    }

    pub fn in_memory() -> Self {
        Self::with_repositories(
            Box::new(InMemoryCursorRepository::default()),
            Box::new(InMemoryLedgerRepository::default()),
        )
    }

    pub fn with_repositories(
        cursor_repo: Box<dyn CursorRepository>,
        ledger_repo: Box<dyn LedgerRepository>,
    ) -> Self {
        Self {
            cursor_repo,
            ledger_repo,
        }
    }

    pub async fn restore_cursor(&self, connection_id: &str) -> Result<Option<i64>, SyncError> {
        self.cursor_repo.load(connection_id).await
    }

    /// Upsert the result's entities, then advance the cursor. The stored cursor never moves
    /// backwards. Returns the cursor now stored.
    pub async fn save_result(
        &self,
        connection_id: &str,
        result: &SyncResult,
    ) -> Result<i64, SyncError> {
        let logs: Vec<_> = result.log_map.values().cloned().collect();
        let transactions: Vec<_> = result.tx_map.values().cloned().collect();
        self.ledger_repo
            .upsert(connection_id, &logs, &transactions)
            .await?;

        let cursor = match self.cursor_repo.load(connection_id).await? {
            Some(previous) if previous > result.new_cursor => {
                debug!(
                    "Keeping cursor {} for {} (run ended at {})",
                    previous, connection_id, result.new_cursor
                );
                previous
            }
            _ => result.new_cursor,
        };
        self.cursor_repo.save(connection_id, cursor).await?;

        info!(
            "Persisted {} logs and {} transactions for {}, cursor {}",
            logs.len(),
            transactions.len(),
            connection_id,
            cursor
        );
        Ok(cursor)
    }

    pub async fn load_ledger(&self, connection_id: &str) -> Result<StoredLedger, SyncError> {
        self.ledger_repo.load(connection_id).await
    }
}
