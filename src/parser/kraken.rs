use super::{
	ImportContext, ParseError, ParserOutput, id_part, optional_decimal, parse_timestamp_ms,
	required, required_decimal,
};
use crate::ledger::{AuditLog, ImportIndex, Operation, asset_id};
use crate::source::RawRecord;
use bigdecimal::{BigDecimal, Zero};

pub const PLATFORM: &str = "kraken";
const WALLET: &str = "Spot";

/// Legacy Kraken asset codes that do not reduce to the ticker by dropping the X/Z prefix.
const ASSET_ALIASES: [(&str, &str); 3] = [("XXBT", "BTC"), ("XBT", "BTC"), ("XXDG", "DOGE")];

/// One row of the ledger export:
/// `txid,refid,time,type,subtype,aclass,asset,amount,fee,balance`.
///
/// Kraken emits one row per asset movement and links the rows of a trade through `refid`, so
/// this parser only produces audit logs; the transaction is reconstructed by extraction from
/// logs sharing `kraken_<refid>`. Rows without a `txid` are pending duplicates and are skipped.
pub fn parse_ledger_entry(
	raw: &RawRecord,
	index: u64,
	ctx: &ImportContext,
) -> Result<ParserOutput, ParseError> {
	let Some(entry_id) = raw.get_non_empty("txid") else {
		return Ok(ParserOutput::default());
	};
	let ref_id = required(raw, "refid")?;
	let timestamp = parse_timestamp_ms(&required(raw, "time")?)?;
	let entry_type = required(raw, "type")?;
	let asset = normalize_asset(&required(raw, "asset")?);
	let amount = required_decimal(raw, "amount")?;
	let fee = optional_decimal(raw, "fee")?;

	let operation = operation_for(&entry_type, &amount)?;
	let tx_id = format!("{}_{}", PLATFORM, id_part(&ref_id));
	let entry_id = format!("{}_{}", PLATFORM, id_part(&entry_id));
	let asset = asset_id(PLATFORM, &asset);

	let mut logs = Vec::with_capacity(2);
	let mut leg = ImportIndex::new(index, 0);
	if !amount.is_zero() {
		logs.push(AuditLog {
			id: entry_id.clone(),
			import_index: leg,
			asset_id: asset.clone(),
			wallet: WALLET.to_string(),
			change: amount,
			operation,
			timestamp,
			tx_id: Some(tx_id.clone()),
			platform: PLATFORM.to_string(),
			provenance: ctx.provenance.clone(),
		});
		leg = leg.next_leg();
	}
	if !fee.is_zero() {
		logs.push(AuditLog {
			id: format!("{}_FEE", entry_id),
			import_index: leg,
			asset_id: asset,
			wallet: WALLET.to_string(),
			change: -fee.abs(),
			operation: Operation::Fee,
			timestamp,
			tx_id: Some(tx_id),
			platform: PLATFORM.to_string(),
			provenance: ctx.provenance.clone(),
		});
	}

	Ok(ParserOutput {
		logs,
		transactions: Vec::new(),
	})
}

fn operation_for(entry_type: &str, amount: &BigDecimal) -> Result<Operation, ParseError> {
	let positive = *amount > BigDecimal::zero();
	let operation = match entry_type.trim().to_lowercase().as_str() {
		"trade" | "spend" | "receive" => {
			if positive {
				Operation::Buy
			} else {
				Operation::Sell
			}
		}
		"deposit" => Operation::Deposit,
		"withdrawal" => Operation::Withdraw,
		"staking" => Operation::Staking,
		"earn" | "dividend" => Operation::Reward,
		"transfer" => Operation::Transfer,
		"margin" => Operation::MarginLoan,
		"rollover" => Operation::FundingFee,
		"settled" => Operation::MarginRepayment,
		other => {
			return Err(ParseError::UnknownValue {
				field: "type".to_string(),
				value: other.to_string(),
			});
		}
	};
	Ok(operation)
}

/// `XXBT` -> `BTC`, `ZEUR` -> `EUR`, `XETH` -> `ETH`; staking suffixes such as `.S` are kept.
fn normalize_asset(code: &str) -> String {
	let code = code.trim().to_uppercase();
	let (base, suffix) = match code.split_once('.') {
		Some((base, suffix)) => (base.to_string(), format!(".{}", suffix)),
		None => (code.clone(), String::new()),
	};

	let ticker = if let Some((_, alias)) = ASSET_ALIASES.iter().find(|(from, _)| *from == base) {
		alias.to_string()
	} else if base.len() == 4 && (base.starts_with('X') || base.starts_with('Z')) {
		base[1..].to_string()
	} else {
		base
	};
	format!("{}{}", ticker, suffix)
}
