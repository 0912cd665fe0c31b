//! Engine configuration.
//!
//! Defaults are usable as is; a JSON file can override any subset of fields and a few
//! environment variables override the file.

use crate::sync::SyncError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_DATA_DIR: &str = "LEDGER_SYNC_DATA_DIR";
pub const ENV_DEBUG: &str = "LEDGER_SYNC_DEBUG";
pub const ENV_CONCURRENCY: &str = "LEDGER_SYNC_CONCURRENCY";

/// How a source is walked: window size, fan-out and spacing between batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PaginationOptions {
	/// Window length in milliseconds.
	pub window_ms: i64,
	/// Maximum number of fetches in flight.
	pub concurrency: usize,
	/// Minimum time between the starts of two consecutive batches.
	pub cooldown_ms: u64,
}

impl Default for PaginationOptions {
	fn default() -> Self {
		Self {
			window_ms: 24 * 60 * 60 * 1000,
			concurrency: 3,
			cooldown_ms: 1000,
		}
	}
}

impl PaginationOptions {
	pub fn cooldown(&self) -> Duration {
		Duration::from_millis(self.cooldown_ms)
	}

	pub fn validate(&self) -> Result<(), SyncError> {
		if self.window_ms < 1 {
			return Err(SyncError::Config(format!(
				"windowMs must be at least 1, got {}",
				self.window_ms
			)));
		}
		if self.concurrency < 1 {
			return Err(SyncError::Config("concurrency must be at least 1".to_string()));
		}
		Ok(())
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
	/// Directory holding cursor and ledger files.
	pub data_dir: PathBuf,
	/// Emit per-window progress messages.
	pub debug: bool,
	pub enable_persistence: bool,
	/// Start of the first sync when no cursor is stored (ms since epoch).
	pub default_since: i64,
	pub request_timeout_secs: u64,
	pub pagination: PaginationOptions,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			data_dir: PathBuf::from("data"),
			debug: false,
			enable_persistence: true,
			default_since: 0,
			request_timeout_secs: 30,
			pagination: PaginationOptions::default(),
		}
	}
}

impl EngineConfig {
	/// Defaults, then the optional JSON file, then the process environment.
	pub fn load(path: Option<&Path>) -> Result<Self, SyncError> {
		let config = match path {
			Some(path) => Self::from_file(path)?,
			None => Self::default(),
		};
		let config = config.with_env(|key| std::env::var(key).ok())?;
		config.pagination.validate()?;
		Ok(config)
	}

	pub fn from_file(path: &Path) -> Result<Self, SyncError> {
		let content = std::fs::read_to_string(path).map_err(|e| {
			SyncError::Config(format!("Failed to read config {}: {}", path.display(), e))
		})?;
		serde_json::from_str(&content).map_err(|e| {
			SyncError::Config(format!("Invalid config {}: {}", path.display(), e))
		})
	}

	/// Apply environment overrides read through `lookup`.
	pub fn with_env<F>(mut self, lookup: F) -> Result<Self, SyncError>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(dir) = lookup(ENV_DATA_DIR).filter(|v| !v.trim().is_empty()) {
			self.data_dir = PathBuf::from(dir.trim());
		}
		if let Some(debug) = lookup(ENV_DEBUG) {
			self.debug = matches!(debug.trim().to_lowercase().as_str(), "1" | "true" | "yes");
		}
		if let Some(concurrency) = lookup(ENV_CONCURRENCY) {
			self.pagination.concurrency = concurrency.trim().parse().map_err(|_| {
				SyncError::Config(format!("{} is not a number: {}", ENV_CONCURRENCY, concurrency))
			})?;
		}
		Ok(self)
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;
	use std::io::Write;

	#[test]
	fn partial_file_keeps_defaults() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, r#"{{ "debug": true, "pagination": {{ "concurrency": 5 }} }}"#).unwrap();

		let config = EngineConfig::from_file(file.path()).unwrap();
		assert!(config.debug);
		assert_eq!(config.pagination.concurrency, 5);
		assert_eq!(config.pagination.window_ms, 86_400_000);
		assert_eq!(config.data_dir, PathBuf::from("data"));
	}

	#[test]
	fn environment_overrides_file_values() {
		let env: HashMap<&str, &str> = HashMap::from([
			(ENV_DATA_DIR, "/tmp/ledger"),
			(ENV_DEBUG, "TRUE"),
			(ENV_CONCURRENCY, "8"),
		]);
		let config = EngineConfig::default()
			.with_env(|key| env.get(key).map(|v| v.to_string()))
			.unwrap();
		assert_eq!(config.data_dir, PathBuf::from("/tmp/ledger"));
		assert!(config.debug);
		assert_eq!(config.pagination.concurrency, 8);
	}

	#[test]
	fn rejects_bad_concurrency() {
		let err = EngineConfig::default()
			.with_env(|key| (key == ENV_CONCURRENCY).then(|| "many".to_string()))
			.unwrap_err();
		assert!(matches!(err, SyncError::Config(_)));

		let zero = PaginationOptions {
			concurrency: 0,
			..PaginationOptions::default()
		};
		assert!(zero.validate().is_err());
	}
}
