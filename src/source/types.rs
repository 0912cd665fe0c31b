//! Types for fetching raw records from external sources

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One raw source record before parsing.
///
/// CSV rows are stored as an object of header -> cell string; API records keep their JSON shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(pub Value);

impl RawRecord {
    /// Build a record from a CSV row using the (trimmed) header names as keys.
    pub fn from_csv_row(headers: &csv::StringRecord, row: &csv::StringRecord) -> Self {
        let mut object = Map::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            object.insert(header.trim().to_string(), Value::String(cell.to_string()));
        }
        Self(Value::Object(object))
    }

    /// Field as a string. Numbers and booleans are rendered with their JSON text so that
    /// decimals survive without a float round trip.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Field as a non-empty trimmed string.
    pub fn get_non_empty(&self, key: &str) -> Option<String> {
        self.get_str(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Sorted key set, used for record-shape detection.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = match &self.0 {
            Value::Object(map) => map.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        };
        keys.sort_unstable();
        keys
    }
}

/// Inclusive time range in milliseconds since epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

impl Window {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |ms: i64| {
            DateTime::<Utc>::from_timestamp_millis(ms)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| ms.to_string())
        };
        write!(f, "{} → {}", render(self.start), render(self.end))
    }
}

/// What to ask a source for: a time window, a symbol, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    pub window: Option<Window>,
    pub symbol: Option<String>,
}

impl FetchRequest {
    pub fn window(window: Window) -> Self {
        Self {
            window: Some(window),
            symbol: None,
        }
    }

    pub fn symbol(symbol: impl Into<String>) -> Self {
        Self {
            window: None,
            symbol: Some(symbol.into()),
        }
    }

    pub fn with_window(mut self, window: Window) -> Self {
        self.window = Some(window);
        self
    }
}

/// Source of raw records (an exchange endpoint, an explorer API, a test fixture).
#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch every record matching the request.
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawRecord>, FetchError>;

    /// Name used in progress messages.
    fn name(&self) -> &str;
}

/// Error types for record fetching
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Rate limited (HTTP {status}, retry after {retry_after:?}s, used weight {used_weight:?})")]
    RateLimited {
        status: u16,
        retry_after: Option<u64>,
        used_weight: Option<u64>,
    },

    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),
}

impl FetchError {
    /// Map a non-success HTTP status into a fetch error. 429 and 418 (IP ban after ignoring 429s)
    /// are rate limits.
    pub fn from_status(
        status: u16,
        retry_after: Option<u64>,
        used_weight: Option<u64>,
        message: String,
    ) -> Self {
        match status {
            429 | 418 => FetchError::RateLimited {
                status,
                retry_after,
                used_weight,
            },
            _ => FetchError::Http { status, message },
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }
}
