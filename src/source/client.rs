//! HTTP JSON record source.
//!
//! This module provides an async client that fetches raw records from a REST endpoint that
//! accepts a time window and/or a symbol as query parameters. Request signing is left to the
//! caller (static headers only); the client's job is to surface HTTP status and rate-limit
//! headers to the pagination orchestrator as typed errors.

use super::types::*;
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Query parameter names understood by the upstream endpoint.
#[derive(Debug, Clone)]
pub struct QueryParams {
	pub start: String,
	pub end: String,
	pub symbol: String,
}

impl Default for QueryParams {
	fn default() -> Self {
		Self {
			start: "startTime".to_string(),
			end: "endTime".to_string(),
			symbol: "symbol".to_string(),
		}
	}
}

/// REST endpoint returning a JSON array of records
#[derive(Clone)]
pub struct HttpRecordSource {
	/// The underlying HTTP client.
	http_client: Client,
	/// Endpoint URL.
	url: String,
	/// Name used in progress messages.
	name: String,
	/// JSON pointer to the record array inside the response ("" for a top-level array).
	records_pointer: String,
	params: QueryParams,
	headers: Vec<(String, String)>,
}

impl HttpRecordSource {
	/// Create a new source.
	///
	/// # Arguments
	/// * `name` - Label used in progress messages.
	/// * `url` - The endpoint queried for every window/symbol.
	/// * `timeout` - Per-request timeout.
	pub fn new(name: &str, url: &str, timeout: Duration) -> Result<Self, FetchError> {
		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			url: url.to_string(),
			name: name.to_string(),
			records_pointer: String::new(),
			params: QueryParams::default(),
			headers: Vec::new(),
		})
	}

	/// Read records from a nested array, e.g. `/result` for explorer APIs.
	pub fn with_records_pointer(mut self, pointer: &str) -> Self {
		self.records_pointer = pointer.to_string();
		self
	}

	/// Rename the window and symbol query parameters.
	pub fn with_params(mut self, params: QueryParams) -> Self {
		self.params = params;
		self
	}

	/// Attach a static header (API key etc.) to every request.
	pub fn with_header(mut self, name: &str, value: &str) -> Self {
		self.headers.push((name.to_string(), value.to_string()));
		self
	}

	fn query(&self, request: &FetchRequest) -> Vec<(String, String)> {
		let mut query = Vec::new();
		if let Some(window) = request.window {
			query.push((self.params.start.clone(), window.start.to_string()));
			query.push((self.params.end.clone(), window.end.to_string()));
		}
		if let Some(symbol) = &request.symbol {
			query.push((self.params.symbol.clone(), symbol.clone()));
		}
		query
	}
}

#[async_trait::async_trait]
impl RecordSource for HttpRecordSource {
	async fn fetch(&self, request: &FetchRequest) -> Result<Vec<RawRecord>, FetchError> {
		let mut builder = self.http_client.get(&self.url).query(&self.query(request));
		for (name, value) in &self.headers {
			builder = builder.header(name, value);
		}

		let response = builder.send().await.map_err(|e| {
			if e.is_timeout() {
				FetchError::Timeout
			} else {
				FetchError::Transport(e)
			}
		})?;

		let status = response.status();
		if !status.is_success() {
			let retry_after = header_u64(response.headers(), &["retry-after"]);
			let used_weight = header_u64(
				response.headers(),
				&["x-mbx-used-weight-1m", "x-mbx-used-weight"],
			);
			let message = response.text().await.unwrap_or_default();
			return Err(FetchError::from_status(
				status.as_u16(),
				retry_after,
				used_weight,
				message,
			));
		}

		// decoded separately so a malformed body is a JSON error, not a transport one
		let text = response.text().await?;
		let body: Value = serde_json::from_str(&text)?;
		let records = extract_records(body, &self.records_pointer)?;
		debug!(
			"Fetched {} records from {} ({:?})",
			records.len(),
			self.name,
			request
		);
		Ok(records)
	}

	fn name(&self) -> &str {
		&self.name
	}
}

/// First parseable numeric value among the given header names.
fn header_u64(headers: &HeaderMap, names: &[&str]) -> Option<u64> {
	names.iter().find_map(|name| {
		headers
			.get(*name)
			.and_then(|v| v.to_str().ok())
			.and_then(|v| v.trim().parse::<u64>().ok())
	})
}

/// Pull the record array out of a response body.
fn extract_records(body: Value, pointer: &str) -> Result<Vec<RawRecord>, FetchError> {
	let target = if pointer.is_empty() {
		body
	} else {
		body.pointer(pointer)
			.cloned()
			.ok_or_else(|| FetchError::UnexpectedShape(format!("missing {}", pointer)))?
	};

	match target {
		Value::Array(items) => Ok(items.into_iter().map(RawRecord).collect()),
		other => Err(FetchError::UnexpectedShape(format!(
			"expected an array of records, got {}",
			other
		))),
	}
}
