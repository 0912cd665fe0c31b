use crate::ledger::{AuditLog, Transaction};
use crate::parser::id_part;
use crate::sync::types::SyncError;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Ledger of one connection, keyed by entity id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredLedger {
	pub logs: BTreeMap<String, AuditLog>,
	pub transactions: BTreeMap<String, Transaction>,
}

impl StoredLedger {
	/// Insert or replace by id.
	pub fn upsert(&mut self, logs: &[AuditLog], transactions: &[Transaction]) {
		for log in logs {
			self.logs.insert(log.id.clone(), log.clone());
		}
		for tx in transactions {
			self.transactions.insert(tx.id.clone(), tx.clone());
		}
	}
}

/// Repository for the per-connection resumption cursor
#[async_trait::async_trait]
pub trait CursorRepository: Send + Sync {
	async fn save(&self, connection_id: &str, cursor: i64) -> Result<(), SyncError>;
	async fn load(&self, connection_id: &str) -> Result<Option<i64>, SyncError>;
}

/// Repository for ledger entities
#[async_trait::async_trait]
pub trait LedgerRepository: Send + Sync {
	async fn upsert(
		&self,
		connection_id: &str,
		logs: &[AuditLog],
		transactions: &[Transaction],
	) -> Result<(), SyncError>;
	async fn load(&self, connection_id: &str) -> Result<StoredLedger, SyncError>;
}

/// Write through a temporary file and rename it into place.
async fn write_atomic(path: &Path, contents: String) -> Result<(), SyncError> {
	let tmp = path.with_extension("json.tmp");
	tokio::fs::write(&tmp, contents).await.map_err(|e| {
		SyncError::Persistence(format!("Failed to write {:?}: {}", tmp, e))
	})?;
	tokio::fs::rename(&tmp, path).await.map_err(|e| {
		SyncError::Persistence(format!("Failed to move {:?} into place: {}", tmp, e))
	})?;
	Ok(())
}

async fn ensure_dir(dir: &Path) -> Result<(), SyncError> {
	tokio::fs::create_dir_all(dir).await.map_err(|e| {
		SyncError::Persistence(format!("Failed to create data directory {:?}: {}", dir, e))
	})
}

/// File-based implementation of CursorRepository
pub struct FileCursorRepository {
	data_dir: PathBuf,
}

impl FileCursorRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn get_cursor_filename(&self, connection_id: &str) -> PathBuf {
		self.data_dir
			.join(format!("cursor_{}.json", id_part(connection_id)))
	}
}

#[async_trait::async_trait]
impl CursorRepository for FileCursorRepository {
	async fn save(&self, connection_id: &str, cursor: i64) -> Result<(), SyncError> {
		ensure_dir(&self.data_dir).await?;
		let metadata = serde_json::json!({
			"cursor": cursor,
			"timestamp": chrono::Utc::now().to_rfc3339(),
		});

		let filename = self.get_cursor_filename(connection_id);
		write_atomic(&filename, serde_json::to_string_pretty(&metadata)?).await?;

		info!("Saved cursor {} for {} to {:?}", cursor, connection_id, filename);
		Ok(())
	}

	async fn load(&self, connection_id: &str) -> Result<Option<i64>, SyncError> {
		let filename = self.get_cursor_filename(connection_id);
		if !tokio::fs::try_exists(&filename).await? {
			return Ok(None);
		}

		let content = tokio::fs::read_to_string(&filename).await?;
		let metadata: serde_json::Value = serde_json::from_str(&content)?;
		let cursor = metadata
			.get("cursor")
			.and_then(|c| c.as_i64())
			.ok_or_else(|| {
				SyncError::Persistence(format!("Cursor file {:?} has no cursor", filename))
			})?;

		debug!("Loaded cursor {} for {}", cursor, connection_id);
		Ok(Some(cursor))
	}
}

/// File-based implementation of LedgerRepository, one JSON document per connection
pub struct FileLedgerRepository {
	data_dir: PathBuf,
}

impl FileLedgerRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn get_ledger_filename(&self, connection_id: &str) -> PathBuf {
		self.data_dir
			.join(format!("ledger_{}.json", id_part(connection_id)))
	}
}

#[async_trait::async_trait]
impl LedgerRepository for FileLedgerRepository {
	async fn upsert(
		&self,
		connection_id: &str,
		logs: &[AuditLog],
		transactions: &[Transaction],
	) -> Result<(), SyncError> {
		ensure_dir(&self.data_dir).await?;
		let mut ledger = self.load(connection_id).await?;
		ledger.upsert(logs, transactions);

		let filename = self.get_ledger_filename(connection_id);
		write_atomic(&filename, serde_json::to_string_pretty(&ledger)?).await?;

		info!(
			"Ledger for {} saved to {:?}: {} logs, {} transactions",
			connection_id,
			filename,
			ledger.logs.len(),
			ledger.transactions.len()
		);
		Ok(())
	}

	async fn load(&self, connection_id: &str) -> Result<StoredLedger, SyncError> {
		let filename = self.get_ledger_filename(connection_id);
		if !tokio::fs::try_exists(&filename).await? {
			return Ok(StoredLedger::default());
		}
		let content = tokio::fs::read_to_string(&filename).await?;
		Ok(serde_json::from_str(&content)?)
	}
}

/// In-memory cursor store
#[derive(Default)]
pub struct InMemoryCursorRepository {
	cursors: Mutex<HashMap<String, i64>>,
}

#[async_trait::async_trait]
impl CursorRepository for InMemoryCursorRepository {
	async fn save(&self, connection_id: &str, cursor: i64) -> Result<(), SyncError> {
		self.cursors
			.lock()
			.await
			.insert(connection_id.to_string(), cursor);
		Ok(())
	}

	async fn load(&self, connection_id: &str) -> Result<Option<i64>, SyncError> {
		Ok(self.cursors.lock().await.get(connection_id).copied())
	}
}

/// In-memory ledger store
#[derive(Default)]
pub struct InMemoryLedgerRepository {
	ledgers: Mutex<HashMap<String, StoredLedger>>,
}

#[async_trait::async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
	async fn upsert(
		&self,
		connection_id: &str,
		logs: &[AuditLog],
		transactions: &[Transaction],
	) -> Result<(), SyncError> {
		self.ledgers
			.lock()
			.await
			.entry(connection_id.to_string())
			.or_default()
			.upsert(logs, transactions);
		Ok(())
	}

	async fn load(&self, connection_id: &str) -> Result<StoredLedger, SyncError> {
		Ok(self
			.ledgers
			.lock()
			.await
			.get(connection_id)
			.cloned()
			.unwrap_or_default())
	}
}
