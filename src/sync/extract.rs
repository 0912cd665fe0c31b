//! Transaction extraction for sources that only emit audit logs.
//!
//! Logs are grouped by `tx_id`, or by `(provenance, source record)` when they carry none, and
//! each group is summarized into at most one Transaction: fee legs become the fee, the other
//! legs are netted per asset, and the resulting shape decides the type.

use crate::ledger::{AuditLog, Operation, Provenance, Transaction, TransactionType};
use crate::parser::id_part;

use bigdecimal::{BigDecimal, Zero};
use itertools::Itertools;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum GroupKey {
	TxId(String),
	Record(Provenance, u64),
}

/// Synthesize transactions for every log group without a parser-emitted transaction.
///
/// Logs of a group keyed by source record get the synthesized transaction's id as their
/// `tx_id`. Returned transactions are sorted by `(timestamp, id)`.
pub fn extract_transactions(logs: &mut [AuditLog], existing: &[Transaction]) -> Vec<Transaction> {
	let existing_ids: HashSet<&str> = existing.iter().map(|tx| tx.id.as_str()).collect();

	let groups = logs
		.iter()
		.enumerate()
		.map(|(position, log)| {
			let key = match log.tx_id.as_deref().filter(|id| !id.trim().is_empty()) {
				Some(id) => GroupKey::TxId(id.to_string()),
				None => GroupKey::Record(log.provenance.clone(), log.import_index.source),
			};
			(key, position)
		})
		.into_group_map();

	let mut extracted = Vec::new();
	for (key, mut members) in groups {
		members.sort_by_key(|&position| logs[position].import_index);
		let tx_id = match &key {
			GroupKey::TxId(id) => id.clone(),
			GroupKey::Record(provenance, source) => {
				format!(
					"{}_{}_{}",
					logs[members[0]].platform,
					id_part(provenance.id()),
					source
				)
			}
		};
		if existing_ids.contains(tx_id.as_str()) {
			continue;
		}

		let summary = {
			let legs: Vec<&AuditLog> = members.iter().map(|&position| &logs[position]).collect();
			summarize(&tx_id, &legs)
		};
		let Some(tx) = summary else {
			debug!("No transaction shape for {} ({} legs)", tx_id, members.len());
			continue;
		};

		if matches!(key, GroupKey::Record(..)) {
			for &position in &members {
				logs[position].tx_id = Some(tx_id.clone());
			}
		}
		extracted.push(tx);
	}

	extracted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
	extracted
}

/// Summarize legs already ordered by import index.
fn summarize(tx_id: &str, legs: &[&AuditLog]) -> Option<Transaction> {
	let first = legs.first()?;
	let mut fee: Option<(String, BigDecimal)> = None;
	let mut nets: Vec<(String, BigDecimal)> = Vec::new();
	let mut rewarded = false;

	for leg in legs {
		if leg.operation == Operation::Fee {
			let amount = leg.change.abs();
			if let Some((asset, total)) = fee.as_mut() {
				if *asset == leg.asset_id {
					*total += amount;
				} else {
					debug!("{}: ignoring fee leg {} in second fee asset", tx_id, leg.id);
				}
			} else {
				fee = Some((leg.asset_id.clone(), amount));
			}
			continue;
		}
		if leg.change.is_zero() {
			continue;
		}
		rewarded |= leg.operation.is_reward();
		match nets.iter_mut().find(|(asset, _)| *asset == leg.asset_id) {
			Some((_, net)) => *net += leg.change.clone(),
			None => nets.push((leg.asset_id.clone(), leg.change.clone())),
		}
	}

	let zero = BigDecimal::zero();
	let (outgoing, incoming): (Vec<_>, Vec<_>) = nets
		.into_iter()
		.filter(|(_, net)| !net.is_zero())
		.partition(|(_, net)| *net < zero);

	let tx_type = match (outgoing.len(), incoming.len()) {
		(1, 1) => TransactionType::Swap,
		(0, 1) if rewarded => TransactionType::Reward,
		(0, 1) => TransactionType::Deposit,
		(1, 0) => TransactionType::Withdraw,
		_ => return None,
	};

	let mut tx = Transaction::new(
		tx_id.to_string(),
		tx_type,
		first.timestamp,
		&first.platform,
		&first.wallet,
		first.provenance.clone(),
	);
	if let Some((asset, amount)) = incoming.into_iter().next() {
		tx.incoming = Some(amount);
		tx.incoming_asset = Some(asset);
	}
	if let Some((asset, amount)) = outgoing.into_iter().next() {
		tx.outgoing = Some(-amount);
		tx.outgoing_asset = Some(asset);
	}
	if let Some((asset, amount)) = fee.filter(|(_, amount)| !amount.is_zero()) {
		tx.fee = Some(amount);
		tx.fee_asset = Some(asset);
	}
	tx.derive_price();
	Some(tx)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ledger::ImportIndex;
	use std::str::FromStr;

	fn dec(value: &str) -> BigDecimal {
		BigDecimal::from_str(value).unwrap()
	}

	fn leg(
		id: &str,
		tx_id: Option<&str>,
		index: (u64, u32),
		asset: &str,
		change: &str,
		operation: Operation,
	) -> AuditLog {
		AuditLog {
			id: id.to_string(),
			import_index: ImportIndex::new(index.0, index.1),
			asset_id: asset.to_string(),
			wallet: "Spot".to_string(),
			change: dec(change),
			operation,
			timestamp: 1_000,
			tx_id: tx_id.map(str::to_string),
			platform: "kraken".to_string(),
			provenance: Provenance::FileImportId("f1".to_string()),
		}
	}

	#[test]
	fn two_sided_group_becomes_swap_with_fee() {
		let mut logs = vec![
			leg("L2", Some("kraken_T1"), (1, 0), "kraken:BTC", "0.002", Operation::Buy),
			leg("L1", Some("kraken_T1"), (0, 0), "kraken:EUR", "-100", Operation::Sell),
			leg("L1_FEE", Some("kraken_T1"), (0, 1), "kraken:EUR", "-0.26", Operation::Fee),
		];
		let txs = extract_transactions(&mut logs, &[]);

		assert_eq!(txs.len(), 1);
		let tx = &txs[0];
		assert_eq!(tx.id, "kraken_T1");
		assert_eq!(tx.tx_type, TransactionType::Swap);
		assert_eq!(tx.incoming, Some(dec("0.002")));
		assert_eq!(tx.outgoing, Some(dec("100")));
		assert_eq!(tx.outgoing_asset.as_deref(), Some("kraken:EUR"));
		assert_eq!(tx.fee, Some(dec("0.26")));
		assert_eq!(tx.price, Some(dec("50000")));
	}

	#[test]
	fn one_sided_groups_are_rewards_deposits_or_withdrawals() {
		let mut logs = vec![
			leg("S", Some("s"), (0, 0), "kraken:DOT", "1.2", Operation::Staking),
			leg("D", Some("d"), (1, 0), "kraken:BTC", "0.5", Operation::Deposit),
			leg("W", Some("w"), (2, 0), "kraken:BTC", "-0.4", Operation::Withdraw),
			leg("W_FEE", Some("w"), (2, 1), "kraken:BTC", "-0.0005", Operation::Fee),
		];
		let txs = extract_transactions(&mut logs, &[]);
		let types: Vec<(&str, TransactionType)> =
			txs.iter().map(|tx| (tx.id.as_str(), tx.tx_type)).collect();
		assert_eq!(
			types,
			vec![
				("d", TransactionType::Deposit),
				("s", TransactionType::Reward),
				("w", TransactionType::Withdraw),
			]
		);
		assert_eq!(txs[2].outgoing, Some(dec("0.4")));
		assert_eq!(txs[2].fee, Some(dec("0.0005")));
		assert_eq!(txs[2].price, None);
	}

	#[test]
	fn fee_only_and_multi_asset_groups_produce_nothing() {
		let mut logs = vec![
			leg("F", Some("fee"), (0, 0), "kraken:EUR", "-1", Operation::Fee),
			leg("A", Some("multi"), (1, 0), "kraken:BTC", "1", Operation::Buy),
			leg("B", Some("multi"), (1, 1), "kraken:ETH", "2", Operation::Buy),
			leg("C", Some("multi"), (1, 2), "kraken:EUR", "-3", Operation::Sell),
			leg("Z", Some("zero"), (2, 0), "kraken:EUR", "0", Operation::Transfer),
		];
		assert!(extract_transactions(&mut logs, &[]).is_empty());
		assert_eq!(logs.len(), 5);
	}

	#[test]
	fn legs_without_tx_id_group_by_record_and_get_linked() {
		let mut logs = vec![
			leg("a", None, (7, 0), "kraken:EUR", "-10", Operation::Sell),
			leg("b", None, (7, 1), "kraken:ADA", "25", Operation::Buy),
			leg("c", None, (8, 0), "kraken:ADA", "3", Operation::Deposit),
		];
		let txs = extract_transactions(&mut logs, &[]);

		assert_eq!(txs.len(), 2);
		assert_eq!(txs[0].id, "kraken_f1_7");
		assert_eq!(txs[0].tx_type, TransactionType::Swap);
		assert_eq!(logs[0].tx_id.as_deref(), Some("kraken_f1_7"));
		assert_eq!(logs[1].tx_id.as_deref(), Some("kraken_f1_7"));
		assert_eq!(logs[2].tx_id.as_deref(), Some("kraken_f1_8"));
	}

	#[test]
	fn groups_with_parser_transactions_are_not_re_extracted() {
		let mut logs = vec![leg("x", Some("binance_1"), (0, 0), "binance:BTC", "1", Operation::Buy)];
		let existing = Transaction::new(
			"binance_1".to_string(),
			TransactionType::Swap,
			1_000,
			"binance",
			"Spot",
			Provenance::FileImportId("f1".to_string()),
		);
		assert!(extract_transactions(&mut logs, &[existing]).is_empty());
	}

	#[test]
	fn netting_cancels_same_asset_legs() {
		let mut logs = vec![
			leg("a", Some("t"), (0, 0), "kraken:BTC", "1", Operation::Transfer),
			leg("b", Some("t"), (0, 1), "kraken:BTC", "-1", Operation::Transfer),
			leg("c", Some("t"), (0, 2), "kraken:USD", "5", Operation::Deposit),
		];
		let txs = extract_transactions(&mut logs, &[]);
		assert_eq!(txs[0].tx_type, TransactionType::Deposit);
		assert_eq!(txs[0].incoming_asset.as_deref(), Some("kraken:USD"));
	}
}
