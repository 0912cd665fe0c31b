use crate::ledger::{AuditLog, Operation, Transaction};
use crate::parser::ParseError;
use crate::source::FetchError;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Error types for a sync run
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Sync cancelled")]
	Cancelled,

	#[error("Rate limited: {0}")]
	RateLimited(FetchError),

	#[error("Fetch error: {0}")]
	Fetch(FetchError),

	#[error("Import failed at row {row}: {source}")]
	Import { row: u64, source: ParseError },

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("CSV error: {0}")]
	Csv(#[from] csv::Error),

	#[error("Persistence error: {0}")]
	Persistence(String),

	#[error("Unsupported file: {0}")]
	UnsupportedFile(String),

	#[error("Configuration error: {0}")]
	Config(String),
}

impl From<FetchError> for SyncError {
	fn from(error: FetchError) -> Self {
		if error.is_rate_limit() {
			SyncError::RateLimited(error)
		} else {
			SyncError::Fetch(error)
		}
	}
}

impl SyncError {
	/// Errors that only invalidate the window that produced them.
	pub fn is_window_local(&self) -> bool {
		matches!(self, SyncError::Fetch(_))
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
	#[default]
	Complete,
	Cancelled,
}

/// A window (or index) whose fetch failed and was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowFailure {
	pub label: String,
	pub message: String,
}

/// A fetched record the parser rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
	pub index: u64,
	pub message: String,
}

/// Output of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
	pub log_map: BTreeMap<String, AuditLog>,
	pub tx_map: BTreeMap<String, Transaction>,
	pub asset_map: BTreeSet<String>,
	pub wallet_map: BTreeSet<String>,
	pub operation_map: BTreeSet<Operation>,
	/// Number of merged audit logs.
	pub rows: usize,
	/// Where the next sync resumes (ms since epoch).
	pub new_cursor: i64,
	pub status: SyncStatus,
	pub failures: Vec<WindowFailure>,
	pub skipped_records: Vec<SkippedRecord>,
}

impl SyncResult {
	pub fn is_cancelled(&self) -> bool {
		self.status == SyncStatus::Cancelled
	}

	/// Logs in ledger order.
	pub fn ordered_logs(&self) -> Vec<&AuditLog> {
		let mut logs: Vec<&AuditLog> = self.log_map.values().collect();
		logs.sort_by(|a, b| {
			a.timestamp
				.cmp(&b.timestamp)
				.then(a.import_index.cmp(&b.import_index))
				.then_with(|| a.id.cmp(&b.id))
		});
		logs
	}
}
