//! Merge and deduplication of parser output.
//!
//! The same source event can arrive several times: overlapping windows, retried syncs, the same
//! file imported twice. Entities are collapsed by `id`, keeping the copy from the most recent
//! fetch (highest rank) and otherwise the first one seen, then sorted into ledger order.

use crate::ledger::{AuditLog, Operation, Transaction, TransactionType, asset_id};
use crate::parser::evm;
use crate::utils::{WETH_CONTRACT, normalize_evm_address};

use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

const WETH_SYMBOL: &str = "WETH";

/// An entity tagged with the rank of the fetch that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked<T> {
    pub rank: usize,
    pub item: T,
}

impl<T> Ranked<T> {
    pub fn new(rank: usize, item: T) -> Self {
        Self { rank, item }
    }
}

trait Identified {
    fn id(&self) -> &str;
}

impl Identified for AuditLog {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for Transaction {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Group by id and keep one occurrence per id, in first-seen order.
fn collapse<T: Identified>(entities: Vec<Ranked<T>>, kind: &str) -> Vec<T> {
    let mut kept: Vec<Ranked<T>> = Vec::with_capacity(entities.len());
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(entities.len());
    let mut duplicates = 0usize;

    for entity in entities {
        if entity.item.id().trim().is_empty() {
            warn!("Skipping {} without id (fetch rank {})", kind, entity.rank);
            continue;
        }
        match positions.get(entity.item.id()) {
            Some(&position) => {
                duplicates += 1;
                if entity.rank > kept[position].rank {
                    kept[position] = entity;
                }
            }
            None => {
                positions.insert(entity.item.id().to_string(), kept.len());
                kept.push(entity);
            }
        }
    }

    if duplicates > 0 {
        debug!("Collapsed {} duplicate {}s", duplicates, kind);
    }
    kept.into_iter().map(|ranked| ranked.item).collect()
}

/// Deduplicate parser-emitted transactions and sort them by `(timestamp, id)`.
pub fn merge_transactions(transactions: Vec<Ranked<Transaction>>) -> Vec<Transaction> {
    let mut merged = collapse(transactions, "transaction");
    merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    merged
}

/// Deduplicate audit logs, apply source corrections and sort into ledger order
/// `(timestamp, import index, id)`.
///
/// `transactions` must already be merged; the WETH unwrap correction rewrites the matching
/// transactions in place and adds their paired logs.
pub fn merge_audit_logs(
    logs: Vec<Ranked<AuditLog>>,
    transactions: &mut [Transaction],
) -> Vec<AuditLog> {
    let mut merged = collapse(logs, "audit log");
    apply_weth_unwrap(&mut merged, transactions);
    merged.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.import_index.cmp(&b.import_index))
            .then_with(|| a.id.cmp(&b.id))
    });
    merged
}

/// Ethereum mainnet: ETH received from the WETH contract through an internal call is the payout
/// of an unwrap. The deposit becomes an Unwrap and a WETH outflow leg is added after the
/// transaction's existing legs. Already corrected transactions are left alone.
pub fn apply_weth_unwrap(logs: &mut Vec<AuditLog>, transactions: &mut [Transaction]) {
    let native = asset_id(evm::PLATFORM, evm::NATIVE_SYMBOL);
    let wrapped = asset_id(evm::PLATFORM, WETH_SYMBOL);
    let mut known_ids: HashSet<String> = logs.iter().map(|log| log.id.clone()).collect();

    for tx in transactions.iter_mut() {
        let from_weth = tx
            .metadata
            .get("from")
            .and_then(|from| normalize_evm_address(from))
            .is_some_and(|from| from == WETH_CONTRACT);
        if tx.platform != evm::PLATFORM
            || tx.tx_type != TransactionType::Deposit
            || tx.incoming_asset.as_deref() != Some(native.as_str())
            || !from_weth
        {
            continue;
        }
        let Some(amount) = tx.incoming.clone() else {
            continue;
        };

        let log_id = format!("{}_WETH", tx.id);
        if !known_ids.contains(&log_id) {
            let last_leg = logs
                .iter()
                .filter(|log| log.tx_id.as_deref() == Some(tx.id.as_str()))
                .map(|log| log.import_index)
                .max();
            let Some(last_leg) = last_leg else {
                debug!("No legs for WETH payout {}, leaving it as a deposit", tx.id);
                continue;
            };
            logs.push(AuditLog {
                id: log_id.clone(),
                import_index: last_leg.next_leg(),
                asset_id: wrapped.clone(),
                wallet: tx.wallet.clone(),
                change: -amount.clone(),
                operation: Operation::Withdraw,
                timestamp: tx.timestamp,
                tx_id: Some(tx.id.clone()),
                platform: tx.platform.clone(),
                provenance: tx.provenance.clone(),
            });
            known_ids.insert(log_id);
        }

        tx.tx_type = TransactionType::Unwrap;
        tx.outgoing = Some(amount);
        tx.outgoing_asset = Some(wrapped.clone());
        tx.derive_price();
        debug!("Reclassified {} as WETH unwrap", tx.id);
    }
}
