//! Canonical ledger entities shared by every parser and every sync stage.

use crate::utils::is_quote_symbol;
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Position of a leg inside the source stream.
///
/// `source` is the raw record's sequence position and `leg` the leg number inside that record.
/// Ordering is lexicographic, so all legs of one record sort together in economic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImportIndex {
	pub source: u64,
	pub leg: u32,
}

impl ImportIndex {
	pub fn new(source: u64, leg: u32) -> Self {
		Self { source, leg }
	}

	/// Index of the next leg of the same record.
	pub fn next_leg(self) -> Self {
		Self {
			source: self.source,
			leg: self.leg + 1,
		}
	}
}

impl fmt::Display for ImportIndex {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}", self.source, self.leg)
	}
}

/// Where a ledger entity came from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Provenance {
	FileImportId(String),
	ConnectionId(String),
}

impl Provenance {
	pub fn id(&self) -> &str {
		match self {
			Provenance::FileImportId(id) | Provenance::ConnectionId(id) => id,
		}
	}
}

/// Balance change taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Operation {
	Buy,
	Sell,
	Fee,
	Deposit,
	Withdraw,
	Transfer,
	Reward,
	Staking,
	#[serde(rename = "Margin Loan")]
	MarginLoan,
	#[serde(rename = "Margin Repayment")]
	MarginRepayment,
	#[serde(rename = "Funding Fee")]
	FundingFee,
	#[serde(rename = "Smart Contract")]
	SmartContract,
}

impl Operation {
	pub fn as_str(&self) -> &'static str {
		match self {
			Operation::Buy => "Buy",
			Operation::Sell => "Sell",
			Operation::Fee => "Fee",
			Operation::Deposit => "Deposit",
			Operation::Withdraw => "Withdraw",
			Operation::Transfer => "Transfer",
			Operation::Reward => "Reward",
			Operation::Staking => "Staking",
			Operation::MarginLoan => "Margin Loan",
			Operation::MarginRepayment => "Margin Repayment",
			Operation::FundingFee => "Funding Fee",
			Operation::SmartContract => "Smart Contract",
		}
	}

	pub fn is_reward(&self) -> bool {
		matches!(self, Operation::Reward | Operation::Staking)
	}
}

impl fmt::Display for Operation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Composite economic event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
	Swap,
	Deposit,
	Withdraw,
	Reward,
	Unwrap,
}

/// An atomic, signed balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
	pub id: String,
	pub import_index: ImportIndex,
	/// `platform:symbol`
	pub asset_id: String,
	pub wallet: String,
	pub change: BigDecimal,
	pub operation: Operation,
	/// Milliseconds since epoch.
	pub timestamp: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tx_id: Option<String>,
	pub platform: String,
	pub provenance: Provenance,
}

/// Free-form provenance attached to a transaction (hash, contract, method, counterparty).
pub type TransactionMetadata = BTreeMap<String, String>;

/// A composite economic event summarizing one or more audit logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
	pub id: String,
	#[serde(rename = "type")]
	pub tx_type: TransactionType,
	pub timestamp: i64,
	pub platform: String,
	pub wallet: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub incoming: Option<BigDecimal>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub incoming_asset: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub outgoing: Option<BigDecimal>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub outgoing_asset: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub fee: Option<BigDecimal>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub fee_asset: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub price: Option<BigDecimal>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub metadata: TransactionMetadata,
	pub provenance: Provenance,
}

impl Transaction {
	/// A transaction with no legs filled in yet.
	pub fn new(
		id: String,
		tx_type: TransactionType,
		timestamp: i64,
		platform: &str,
		wallet: &str,
		provenance: Provenance,
	) -> Self {
		Self {
			id,
			tx_type,
			timestamp,
			platform: platform.to_string(),
			wallet: wallet.to_string(),
			incoming: None,
			incoming_asset: None,
			outgoing: None,
			outgoing_asset: None,
			fee: None,
			fee_asset: None,
			price: None,
			metadata: TransactionMetadata::new(),
			provenance,
		}
	}

	/// Recompute `price` from the two legs, ignoring whatever the source reported.
	///
	/// Price is quoted in the fiat/stablecoin side when one exists (`outgoing / incoming` for a
	/// buy paid in USDT), otherwise `incoming / outgoing`. Left untouched when either side is
	/// missing or zero.
	pub fn derive_price(&mut self) {
		let (Some(incoming), Some(outgoing)) = (&self.incoming, &self.outgoing) else {
			return;
		};
		if incoming.is_zero() || outgoing.is_zero() {
			return;
		}
		let outgoing_is_quote = self
			.outgoing_asset
			.as_deref()
			.map(is_quote_symbol)
			.unwrap_or(false);
		let price = if outgoing_is_quote {
			outgoing / incoming
		} else {
			incoming / outgoing
		};
		self.price = Some(price.normalized());
	}
}

/// Build a namespaced asset id.
pub fn asset_id(platform: &str, symbol: &str) -> String {
	format!("{}:{}", platform, symbol)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn import_index_orders_by_record_then_leg() {
		let mut indices = vec![
			ImportIndex::new(3, 0),
			ImportIndex::new(2, 2),
			ImportIndex::new(2, 0),
			ImportIndex::new(2, 10),
			ImportIndex::new(2, 1),
		];
		indices.sort();
		let shown: Vec<String> = indices.iter().map(ToString::to_string).collect();
		// leg 10 stays inside record 2, unlike a fractional 2.10 == 2.1 collision
		assert_eq!(shown, vec!["2.0", "2.1", "2.2", "2.10", "3.0"]);
	}

	#[test]
	fn next_leg_keeps_source_position() {
		let index = ImportIndex::new(7, 0).next_leg().next_leg();
		assert_eq!(index, ImportIndex::new(7, 2));
	}

	#[test]
	fn operations_serialize_with_display_names() {
		let json = serde_json::to_string(&Operation::MarginLoan).unwrap();
		assert_eq!(json, "\"Margin Loan\"");
		let back: Operation = serde_json::from_str("\"Funding Fee\"").unwrap();
		assert_eq!(back, Operation::FundingFee);
	}

	fn swap(incoming: &str, incoming_asset: &str, outgoing: &str, outgoing_asset: &str) -> Transaction {
		let mut tx = Transaction::new(
			"tx".into(),
			TransactionType::Swap,
			0,
			"binance",
			"Spot",
			Provenance::ConnectionId("c".into()),
		);
		tx.incoming = incoming.parse().ok();
		tx.incoming_asset = Some(incoming_asset.into());
		tx.outgoing = outgoing.parse().ok();
		tx.outgoing_asset = Some(outgoing_asset.into());
		tx
	}

	#[test]
	fn price_is_quoted_in_stablecoin_side() {
		let mut buy = swap("1.5", "binance:BTC", "45000", "binance:USDT");
		buy.derive_price();
		assert_eq!(buy.price, Some(BigDecimal::from(30000)));

		let mut sell = swap("45000", "binance:USDT", "1.5", "binance:BTC");
		sell.derive_price();
		assert_eq!(sell.price, Some(BigDecimal::from(30000)));
	}

	#[test]
	fn price_skipped_for_zero_or_missing_leg() {
		let mut zero = swap("0", "binance:BTC", "10", "binance:USDT");
		zero.derive_price();
		assert_eq!(zero.price, None);

		let mut one_sided = swap("1", "binance:BTC", "1", "binance:USDT");
		one_sided.outgoing = None;
		one_sided.derive_price();
		assert_eq!(one_sided.price, None);
	}

	#[test]
	fn provenance_serializes_as_tagged_id() {
		let json = serde_json::to_value(Provenance::FileImportId("abc".into())).unwrap();
		assert_eq!(json, serde_json::json!({ "fileImportId": "abc" }));
	}
}
