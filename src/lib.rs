//! Ledger synchronization and normalization engine.
//!
//! Fetches exchange and explorer data (CSV exports, paginated REST endpoints), normalizes every
//! record into audit logs and transactions, and merges them into a resumable per-connection
//! ledger.

pub mod config;
pub mod ledger;
pub mod parser;
pub mod source;
pub mod sync;
pub mod utils;
