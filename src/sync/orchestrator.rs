//! Ledger sync orchestrator and integration point for all sync stages.
//!
//! This module defines the `LedgerSyncOrchestrator`, which coordinates one sync run for one
//! connection:
//! - restore the cursor (where the previous run stopped)
//! - run the configured strategy over `[cursor, until]`
//! - merge and deduplicate everything the strategy produced
//! - extract transactions and aggregate the `SyncResult`
//! - persist the ledger, then the new cursor
//!
//! A fatal error (rate limit, malformed file) persists nothing. A cancelled run persists what it
//! fetched and a cursor that only covers the windows that settled.

use crate::sync::aggregate::aggregate;
use crate::sync::context::SyncContext;
use crate::sync::merge::{merge_audit_logs, merge_transactions};
use crate::sync::state_persistence::StatePersistenceService;
use crate::sync::strategies::{StrategyOutput, SyncRange, SyncStrategy};
use crate::sync::types::{SyncError, SyncResult, SyncStatus};

use std::sync::Arc;
use tracing::{error, info};

/// Main ledger sync orchestrator.
pub struct LedgerSyncOrchestrator {
    connection_id: String,
    sync_strategy: Box<dyn SyncStrategy>,
    persistence_service: Arc<StatePersistenceService>,
    enable_persistence: bool,
    /// Start of the range when no cursor is stored.
    default_since: i64,
}

impl LedgerSyncOrchestrator {
    pub fn new(
        connection_id: &str,
        sync_strategy: Box<dyn SyncStrategy>,
        persistence_service: Arc<StatePersistenceService>,
    ) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            sync_strategy,
            persistence_service,
            enable_persistence: true,
            default_since: 0,
        }
    }

    pub fn with_persistence(mut self, enabled: bool) -> Self {
        self.enable_persistence = enabled;
        self
    }

    pub fn with_default_since(mut self, since: i64) -> Self {
        self.default_since = since;
        self
    }

    /// Sync everything up to and including `until` (ms since epoch).
    pub async fn sync(&self, until: i64, ctx: &SyncContext) -> Result<SyncResult, SyncError> {
        info!(
            "Starting ledger sync for {} using {}",
            self.connection_id,
            self.sync_strategy.name()
        );

        let since = if self.enable_persistence {
            match self
                .persistence_service
                .restore_cursor(&self.connection_id)
                .await?
            {
                Some(cursor) => {
                    info!("Restored cursor {}, continuing sync", cursor);
                    cursor
                }
                None => {
                    info!("No cursor found, starting from {}", self.default_since);
                    self.default_since
                }
            }
        } else {
            self.default_since
        };

        if since > until {
            info!(
                "Already synced to latest state (cursor {} > until {})",
                since, until
            );
            return Ok(SyncResult {
                new_cursor: since,
                ..SyncResult::default()
            });
        }

        ctx.report(
            Some(0.0),
            &format!("Syncing {} from {} to {}", self.connection_id, since, until),
        );
        let output = match self
            .sync_strategy
            .sync(SyncRange { since, until }, ctx)
            .await
        {
            Ok(output) => output,
            Err(SyncError::Cancelled) => {
                info!("Sync of {} cancelled before any fetch", self.connection_id);
                StrategyOutput {
                    cancelled: true,
                    resume_at: Some(since),
                    ..StrategyOutput::default()
                }
            }
            Err(e) => {
                error!("Sync of {} failed: {}", self.connection_id, e);
                return Err(e);
            }
        };

        let mut transactions = merge_transactions(output.transactions);
        let logs = merge_audit_logs(output.logs, &mut transactions);
        let mut result = aggregate(logs, transactions, until);
        if output.cancelled {
            result.status = SyncStatus::Cancelled;
            result.new_cursor = output.resume_at.unwrap_or(since);
        }

        {
            let mut tracker = ctx.tracker();
            tracker.log_progress(true);
            info!("Sync finished: {}", tracker.get_stats().summary());
            result.failures = tracker.take_failures();
            result.skipped_records = tracker.take_skipped();
        }

        if self.enable_persistence {
            self.persistence_service
                .save_result(&self.connection_id, &result)
                .await?;
        }

        ctx.report(
            Some(100.0),
            &format!(
                "{} {}: {} logs, {} transactions",
                self.connection_id,
                if result.is_cancelled() {
                    "cancelled"
                } else {
                    "synced"
                },
                result.rows,
                result.tx_map.len()
            ),
        );
        Ok(result)
    }
}
