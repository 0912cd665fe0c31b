//! Parser registry.
//!
//! Every supported source format is one variant of [`ParserKind`]. A variant is resolved once per
//! import from the CSV header line ([`ParserKind::from_header`]) or from the shape of an API
//! record ([`ParserKind::from_record_shape`]) and then applied to every raw record.
//!
//! Parsers are pure: the same raw record, index and context always produce the same output,
//! with ids derived from source identifiers and legs numbered in economic order (outflow,
//! inflow, fee).

/// Binance spot trades, deposits and withdrawals
pub mod binance;
/// Etherscan-style normal and internal transactions
pub mod evm;
/// Kraken ledger export
pub mod kraken;

use crate::ledger::{AuditLog, Provenance, Transaction};
use crate::source::RawRecord;
use crate::utils::parse_decimal;
use bigdecimal::BigDecimal;
use chrono::{NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Context shared by every record of one import or connection.
#[derive(Debug, Clone)]
pub struct ImportContext {
	pub provenance: Provenance,
	/// Address owned by the account, required by on-chain parsers to sign value legs.
	pub wallet_address: Option<String>,
	/// Number of earlier rows in the same file with identical content. Parsers that derive ids
	/// from row content fold it into the id so repeated fills stay distinct.
	pub occurrence: u32,
}

impl ImportContext {
	pub fn file_import(id: &str) -> Self {
		Self {
			provenance: Provenance::FileImportId(id.to_string()),
			wallet_address: None,
			occurrence: 0,
		}
	}

	pub fn connection(id: &str) -> Self {
		Self {
			provenance: Provenance::ConnectionId(id.to_string()),
			wallet_address: None,
			occurrence: 0,
		}
	}

	pub fn with_wallet_address(mut self, address: &str) -> Self {
		self.wallet_address = Some(address.to_string());
		self
	}

	pub fn with_occurrence(mut self, occurrence: u32) -> Self {
		self.occurrence = occurrence;
		self
	}

	/// Suffix a content-derived id with the row's occurrence, leaving first occurrences as is.
	pub(crate) fn content_id(&self, id: String) -> String {
		if self.occurrence == 0 {
			id
		} else {
			format!("{}_{}", id, self.occurrence)
		}
	}
}

/// Result of parsing one raw record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParserOutput {
	pub logs: Vec<AuditLog>,
	pub transactions: Vec<Transaction>,
}

impl ParserOutput {
	pub fn is_empty(&self) -> bool {
		self.logs.is_empty() && self.transactions.is_empty()
	}
}

/// Error types for malformed or unexpected raw records
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
	#[error("Missing field '{0}'")]
	MissingField(String),

	#[error("Invalid amount in '{field}': {value}")]
	InvalidAmount { field: String, value: String },

	#[error("Invalid timestamp: {0}")]
	InvalidTimestamp(String),

	#[error("Unknown value in '{field}': {value}")]
	UnknownValue { field: String, value: String },

	#[error("Missing import context: {0}")]
	MissingContext(String),

	#[error("Malformed row: {0}")]
	MalformedRow(String),
}

/// The closed set of supported source formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParserKind {
	BinanceSpotTrades,
	BinanceDeposits,
	BinanceWithdrawals,
	BinanceApiTrades,
	KrakenLedger,
	EvmNormal,
	EvmInternal,
}

/// CSV header signatures, compared after normalization.
const HEADER_SIGNATURES: [(&str, ParserKind); 4] = [
	(
		"Date(UTC),Pair,Side,Price,Executed,Amount,Fee",
		ParserKind::BinanceSpotTrades,
	),
	(
		"Date(UTC),Coin,Network,Amount,Address,TXID,Status",
		ParserKind::BinanceDeposits,
	),
	(
		"Date(UTC),Coin,Network,Amount,TransactionFee,Address,TXID,Status",
		ParserKind::BinanceWithdrawals,
	),
	(
		"txid,refid,time,type,subtype,aclass,asset,amount,fee,balance",
		ParserKind::KrakenLedger,
	),
];

impl ParserKind {
	/// Resolve a parser from a CSV header line.
	pub fn from_header(header: &str) -> Option<Self> {
		let normalized = normalize_header(header);
		HEADER_SIGNATURES
			.iter()
			.find(|(signature, _)| *signature == normalized)
			.map(|(_, kind)| *kind)
	}

	/// Resolve a parser from the key set of an API record.
	pub fn from_record_shape(record: &RawRecord) -> Option<Self> {
		let keys = record.keys();
		let has = |key: &str| keys.binary_search(&key).is_ok();

		if has("isBuyer") && has("commissionAsset") && has("qty") && has("quoteQty") {
			Some(ParserKind::BinanceApiTrades)
		} else if has("hash") && has("traceId") && has("value") {
			Some(ParserKind::EvmInternal)
		} else if has("hash") && has("nonce") && has("gasPrice") && has("value") {
			Some(ParserKind::EvmNormal)
		} else {
			None
		}
	}

	pub fn platform(&self) -> &'static str {
		match self {
			ParserKind::BinanceSpotTrades
			| ParserKind::BinanceDeposits
			| ParserKind::BinanceWithdrawals
			| ParserKind::BinanceApiTrades => binance::PLATFORM,
			ParserKind::KrakenLedger => kraken::PLATFORM,
			ParserKind::EvmNormal | ParserKind::EvmInternal => evm::PLATFORM,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			ParserKind::BinanceSpotTrades => "Binance spot trades",
			ParserKind::BinanceDeposits => "Binance deposits",
			ParserKind::BinanceWithdrawals => "Binance withdrawals",
			ParserKind::BinanceApiTrades => "Binance API trades",
			ParserKind::KrakenLedger => "Kraken ledger",
			ParserKind::EvmNormal => "EVM transactions",
			ParserKind::EvmInternal => "EVM internal transactions",
		}
	}

	/// Parse one raw record at stream position `index`.
	pub fn parse(
		&self,
		raw: &RawRecord,
		index: u64,
		ctx: &ImportContext,
	) -> Result<ParserOutput, ParseError> {
		match self {
			ParserKind::BinanceSpotTrades => binance::parse_spot_trade(raw, index, ctx),
			ParserKind::BinanceDeposits => binance::parse_deposit(raw, index, ctx),
			ParserKind::BinanceWithdrawals => binance::parse_withdrawal(raw, index, ctx),
			ParserKind::BinanceApiTrades => binance::parse_api_trade(raw, index, ctx),
			ParserKind::KrakenLedger => kraken::parse_ledger_entry(raw, index, ctx),
			ParserKind::EvmNormal => evm::parse_normal(raw, index, ctx),
			ParserKind::EvmInternal => evm::parse_internal(raw, index, ctx),
		}
	}
}

impl std::str::FromStr for ParserKind {
	type Err = ParseError;

	/// Accepts the kebab-case names used in configuration (`binance-api-trades`).
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		serde_json::from_value(serde_json::Value::String(s.trim().to_lowercase())).map_err(|_| {
			ParseError::UnknownValue {
				field: "parser".to_string(),
				value: s.to_string(),
			}
		})
	}
}

/// Strip BOM, quotes and whitespace around each header cell.
fn normalize_header(header: &str) -> String {
	header
		.trim_start_matches('\u{feff}')
		.trim()
		.split(',')
		.map(|cell| cell.trim().trim_matches('"').trim())
		.collect::<Vec<_>>()
		.join(",")
}

pub(crate) fn required(raw: &RawRecord, field: &str) -> Result<String, ParseError> {
	raw.get_non_empty(field)
		.ok_or_else(|| ParseError::MissingField(field.to_string()))
}

pub(crate) fn required_decimal(raw: &RawRecord, field: &str) -> Result<BigDecimal, ParseError> {
	let value = required(raw, field)?;
	parse_decimal(&value).ok_or(ParseError::InvalidAmount {
		field: field.to_string(),
		value,
	})
}

/// Decimal field that defaults to zero when absent or empty.
pub(crate) fn optional_decimal(raw: &RawRecord, field: &str) -> Result<BigDecimal, ParseError> {
	match raw.get_non_empty(field) {
		Some(value) => parse_decimal(&value).ok_or(ParseError::InvalidAmount {
			field: field.to_string(),
			value,
		}),
		None => Ok(BigDecimal::from(0)),
	}
}

/// Parse an export timestamp into epoch milliseconds.
///
/// Accepts `YYYY-MM-DD HH:MM:SS[.fff]` (UTC), two-digit-year variants, and bare epoch numbers
/// (10 digits = seconds, 13 = milliseconds). Sub-millisecond precision is floored.
pub(crate) fn parse_timestamp_ms(value: &str) -> Result<i64, ParseError> {
	let value = value.trim();
	if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
		let number: i64 = value
			.parse()
			.map_err(|_| ParseError::InvalidTimestamp(value.to_string()))?;
		return Ok(if value.len() <= 10 { number * 1000 } else { number });
	}

	const FORMATS: [&str; 4] = [
		"%Y-%m-%d %H:%M:%S%.f",
		"%Y-%m-%d %H:%M:%S",
		"%y-%m-%d %H:%M:%S",
		"%Y-%m-%dT%H:%M:%S%.fZ",
	];
	FORMATS
		.iter()
		.find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
		.map(|naive| Utc.from_utc_datetime(&naive).timestamp_millis())
		.ok_or_else(|| ParseError::InvalidTimestamp(value.to_string()))
}

/// Make a source identifier safe to embed in an id.
pub(crate) fn id_part(value: &str) -> String {
	value
		.trim()
		.chars()
		.map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn resolves_quoted_headers_with_bom() {
		let header = "\u{feff}\"txid\",\"refid\",\"time\",\"type\",\"subtype\",\"aclass\",\"asset\",\"amount\",\"fee\",\"balance\"";
		assert_eq!(ParserKind::from_header(header), Some(ParserKind::KrakenLedger));
		assert_eq!(
			ParserKind::from_header("Date(UTC), Pair, Side, Price, Executed, Amount, Fee\r\n"),
			Some(ParserKind::BinanceSpotTrades)
		);
		assert_eq!(ParserKind::from_header("a,b,c"), None);
	}

	#[test]
	fn deposit_and_withdrawal_headers_are_distinct() {
		assert_eq!(
			ParserKind::from_header("Date(UTC),Coin,Network,Amount,Address,TXID,Status"),
			Some(ParserKind::BinanceDeposits)
		);
		assert_eq!(
			ParserKind::from_header(
				"Date(UTC),Coin,Network,Amount,TransactionFee,Address,TXID,Status"
			),
			Some(ParserKind::BinanceWithdrawals)
		);
	}

	#[test]
	fn resolves_record_shapes() {
		let trade = RawRecord(json!({
			"symbol": "BTCUSDT", "id": 1, "qty": "1", "quoteQty": "2",
			"commission": "0", "commissionAsset": "BNB", "isBuyer": true, "time": 0
		}));
		assert_eq!(
			ParserKind::from_record_shape(&trade),
			Some(ParserKind::BinanceApiTrades)
		);

		let internal = RawRecord(json!({ "hash": "0x1", "traceId": "0", "value": "1" }));
		assert_eq!(
			ParserKind::from_record_shape(&internal),
			Some(ParserKind::EvmInternal)
		);

		let normal = RawRecord(json!({ "hash": "0x1", "nonce": "1", "gasPrice": "1", "value": "1" }));
		assert_eq!(ParserKind::from_record_shape(&normal), Some(ParserKind::EvmNormal));

		assert_eq!(ParserKind::from_record_shape(&RawRecord(json!({}))), None);
	}

	#[test]
	fn parses_timestamps_to_millis() {
		assert_eq!(parse_timestamp_ms("1970-01-01 00:00:01").unwrap(), 1000);
		assert_eq!(parse_timestamp_ms("1970-01-01 00:00:01.2349").unwrap(), 1234);
		assert_eq!(parse_timestamp_ms("1609459200").unwrap(), 1_609_459_200_000);
		assert_eq!(parse_timestamp_ms("1609459200123").unwrap(), 1_609_459_200_123);
		assert!(matches!(
			parse_timestamp_ms("yesterday"),
			Err(ParseError::InvalidTimestamp(_))
		));
	}

	#[test]
	fn parser_names_round_trip_from_str() {
		assert_eq!(
			"binance-api-trades".parse::<ParserKind>().unwrap(),
			ParserKind::BinanceApiTrades
		);
		assert_eq!(" EVM-Internal ".parse::<ParserKind>().unwrap(), ParserKind::EvmInternal);
		assert!("coinbase".parse::<ParserKind>().is_err());
	}

	#[test]
	fn id_parts_are_sanitized() {
		assert_eq!(id_part(" BTC/USDT 1 "), "BTC_USDT_1");
	}
}
