//! Folds merged logs and transactions into a `SyncResult`.

use crate::ledger::{AuditLog, Transaction};
use crate::sync::extract::extract_transactions;
use crate::sync::types::SyncResult;

/// Build the result of a completed range ending at `until`.
///
/// `logs` and `transactions` must already be merged. Extraction runs here, so `tx_map` holds the
/// parser-emitted transactions plus the synthesized ones.
pub fn aggregate(mut logs: Vec<AuditLog>, transactions: Vec<Transaction>, until: i64) -> SyncResult {
    let extracted = extract_transactions(&mut logs, &transactions);

    let mut result = SyncResult {
        new_cursor: until.saturating_add(1),
        ..SyncResult::default()
    };
    for log in logs {
        result.asset_map.insert(log.asset_id.clone());
        result.wallet_map.insert(log.wallet.clone());
        result.operation_map.insert(log.operation);
        result.rows += 1;
        result.log_map.insert(log.id.clone(), log);
    }
    for tx in transactions.into_iter().chain(extracted) {
        result.tx_map.insert(tx.id.clone(), tx);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{ImportIndex, Operation, Provenance};
    use bigdecimal::BigDecimal;

    fn log(id: &str, asset: &str, wallet: &str, change: i32, operation: Operation) -> AuditLog {
        AuditLog {
            id: id.to_string(),
            import_index: ImportIndex::new(0, 0),
            asset_id: asset.to_string(),
            wallet: wallet.to_string(),
            change: BigDecimal::from(change),
            operation,
            timestamp: 0,
            tx_id: Some(format!("tx_{}", id)),
            platform: "binance".to_string(),
            provenance: Provenance::ConnectionId("c".to_string()),
        }
    }

    #[test]
    fn builds_presence_sets_and_cursor() {
        let logs = vec![
            log("a", "binance:BTC", "Spot", 1, Operation::Deposit),
            log("b", "binance:BTC", "Isolated Margin", -1, Operation::Withdraw),
            log("c", "binance:ETH", "Spot", 0, Operation::Transfer),
        ];
        let result = aggregate(logs, Vec::new(), 999);

        assert_eq!(result.rows, 3);
        assert_eq!(result.log_map.len(), 3);
        assert_eq!(result.asset_map.len(), 2);
        assert_eq!(result.wallet_map.len(), 2);
        assert!(result.operation_map.contains(&Operation::Transfer));
        assert_eq!(result.new_cursor, 1000);
        // the zero-change transfer has no transaction shape
        assert_eq!(result.tx_map.len(), 2);
        assert!(!result.is_cancelled());
    }
}
