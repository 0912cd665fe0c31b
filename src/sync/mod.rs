//! Ledger Synchronization Module
//!
//! This module provides the engine that turns paginated, rate-limited source data into a
//! deduplicated, resumable ledger. It is composed of several submodules, each responsible for a
//! specific stage:
//!
//! - `orchestrator`: The entry point for one sync run. It wires together all stages.
//! - `strategies`: Pluggable ways to walk a source (time windows, symbols x windows, CSV file).
//! - `paginate`: Batched, cancellable fetch loops over windows or index sets.
//! - `merge`: Deduplication by id and the WETH unwrap correction.
//! - `extract`: Transactions synthesized from audit log groups.
//! - `aggregate`: Folds the merged ledger into a `SyncResult`.
//! - `events`, `context`, `progress_tracker`: Progress reporting, cancellation and accumulators.
//! - `repositories`, `state_persistence`: Cursor and ledger storage.

/// Folds merged entities into the sync result
pub mod aggregate;
/// Progress sink, cancellation token and accumulators threaded through a run
pub mod context;
/// Progress sinks and dispatcher
pub mod events;
/// Transaction synthesis from audit logs
pub mod extract;
/// Merge and deduplication
pub mod merge;
/// Main coordinator for the sync process
pub mod orchestrator;
/// Windowed and exact-count pagination
pub mod paginate;
/// Tracks synchronization progress and statistics
pub mod progress_tracker;
/// Cursor and ledger repositories
pub mod repositories;
/// Cursor restore and result persistence
pub mod state_persistence;
/// Pluggable synchronization strategies
pub mod strategies;
/// Errors and the sync result
mod types;

pub use context::SyncContext;
pub use orchestrator::*;
pub use types::*;
