use super::{
	ImportContext, ParseError, ParserOutput, id_part, optional_decimal, parse_timestamp_ms,
	required, required_decimal,
};
use crate::ledger::{AuditLog, ImportIndex, Operation, Transaction, TransactionType, asset_id};
use crate::source::RawRecord;
use crate::utils::{format_amount, split_amount_asset, split_pair};
use bigdecimal::{BigDecimal, Zero};

pub const PLATFORM: &str = "binance";
const SPOT_WALLET: &str = "Spot";

/// Statuses of deposit/withdrawal rows that never moved funds.
const VOID_STATUSES: [&str; 4] = ["failed", "canceled", "cancelled", "rejected"];

/// One executed spot fill, whichever export it came from.
struct Fill {
	tx_id: String,
	timestamp: i64,
	is_buy: bool,
	base: String,
	base_amount: BigDecimal,
	quote: String,
	quote_amount: BigDecimal,
	fee: BigDecimal,
	fee_asset: String,
}

/// Spot trade history export: `Date(UTC),Pair,Side,Price,Executed,Amount,Fee`.
///
/// `Executed`, `Amount` and `Fee` carry the asset as a suffix (`1.5BTC`). The row has no trade
/// id, so the id is derived from the row content.
pub fn parse_spot_trade(
	raw: &RawRecord,
	index: u64,
	ctx: &ImportContext,
) -> Result<ParserOutput, ParseError> {
	let date = required(raw, "Date(UTC)")?;
	let pair = required(raw, "Pair")?;
	let side = required(raw, "Side")?;
	let executed = required(raw, "Executed")?;
	let amount = required(raw, "Amount")?;
	let fee = raw.get_non_empty("Fee").unwrap_or_default();

	let timestamp = parse_timestamp_ms(&date)?;
	let is_buy = parse_side(&side)?;
	// the pair tells where amount and symbol meet (`10.51INCH`)
	let (base_hint, quote_hint) = split_pair(&pair).unwrap_or_default();
	let known = [base_hint.as_str(), quote_hint.as_str()];
	let (base_amount, base) = amount_with_asset("Executed", &executed, &known)?;
	let (quote_amount, quote) = amount_with_asset("Amount", &amount, &known)?;
	let (fee, fee_asset) = if fee.is_empty() {
		(BigDecimal::zero(), base.clone())
	} else {
		amount_with_asset("Fee", &fee, &known)?
	};

	let tx_id = ctx.content_id(format!(
		"{}_{}_{}_{}_{}_{}",
		PLATFORM,
		timestamp,
		id_part(&pair),
		id_part(&side.to_uppercase()),
		id_part(&executed),
		id_part(&amount)
	));

	Ok(fill_output(
		Fill {
			tx_id,
			timestamp,
			is_buy,
			base,
			base_amount,
			quote,
			quote_amount,
			fee,
			fee_asset,
		},
		index,
		ctx,
	))
}

/// `GET /api/v3/myTrades` record.
pub fn parse_api_trade(
	raw: &RawRecord,
	index: u64,
	ctx: &ImportContext,
) -> Result<ParserOutput, ParseError> {
	let symbol = required(raw, "symbol")?;
	let trade_id = required(raw, "id")?;
	let timestamp = parse_timestamp_ms(&required(raw, "time")?)?;
	let is_buy = match required(raw, "isBuyer")?.as_str() {
		"true" => true,
		"false" => false,
		other => {
			return Err(ParseError::UnknownValue {
				field: "isBuyer".to_string(),
				value: other.to_string(),
			});
		}
	};
	let (base, quote) = split_pair(&symbol).ok_or_else(|| ParseError::UnknownValue {
		field: "symbol".to_string(),
		value: symbol.clone(),
	})?;

	Ok(fill_output(
		Fill {
			tx_id: format!("{}_{}_{}", PLATFORM, id_part(&symbol), id_part(&trade_id)),
			timestamp,
			is_buy,
			base,
			base_amount: required_decimal(raw, "qty")?,
			quote,
			quote_amount: required_decimal(raw, "quoteQty")?,
			fee: optional_decimal(raw, "commission")?,
			fee_asset: raw.get_non_empty("commissionAsset").unwrap_or_default(),
		},
		index,
		ctx,
	))
}

/// Deposit history export: `Date(UTC),Coin,Network,Amount,Address,TXID,Status`.
pub fn parse_deposit(
	raw: &RawRecord,
	index: u64,
	ctx: &ImportContext,
) -> Result<ParserOutput, ParseError> {
	let coin = required(raw, "Coin")?;
	let amount = required_decimal(raw, "Amount")?;
	if amount.is_zero() || is_void(raw) {
		return Ok(ParserOutput::default());
	}
	let timestamp = parse_timestamp_ms(&required(raw, "Date(UTC)")?)?;
	let tx_id = transfer_id("deposit", raw, &coin, timestamp, &amount, ctx);
	let asset = asset_id(PLATFORM, &coin);
	let amount = amount.abs();

	let logs = vec![AuditLog {
		id: format!("{}_DEPOSIT", tx_id),
		import_index: ImportIndex::new(index, 0),
		asset_id: asset.clone(),
		wallet: SPOT_WALLET.to_string(),
		change: amount.clone(),
		operation: Operation::Deposit,
		timestamp,
		tx_id: Some(tx_id.clone()),
		platform: PLATFORM.to_string(),
		provenance: ctx.provenance.clone(),
	}];

	let mut tx = Transaction::new(
		tx_id,
		TransactionType::Deposit,
		timestamp,
		PLATFORM,
		SPOT_WALLET,
		ctx.provenance.clone(),
	);
	tx.incoming = Some(amount);
	tx.incoming_asset = Some(asset);
	transfer_metadata(&mut tx, raw);

	Ok(ParserOutput {
		logs,
		transactions: vec![tx],
	})
}

/// Withdrawal history export: `Date(UTC),Coin,Network,Amount,TransactionFee,Address,TXID,Status`.
///
/// A zero amount is short-circuited to an empty output.
pub fn parse_withdrawal(
	raw: &RawRecord,
	index: u64,
	ctx: &ImportContext,
) -> Result<ParserOutput, ParseError> {
	let coin = required(raw, "Coin")?;
	let amount = required_decimal(raw, "Amount")?;
	if amount.is_zero() || is_void(raw) {
		return Ok(ParserOutput::default());
	}
	let fee = optional_decimal(raw, "TransactionFee")?.abs();
	let timestamp = parse_timestamp_ms(&required(raw, "Date(UTC)")?)?;
	let tx_id = transfer_id("withdraw", raw, &coin, timestamp, &amount, ctx);
	let asset = asset_id(PLATFORM, &coin);
	let amount = amount.abs();

	let mut logs = vec![AuditLog {
		id: format!("{}_WITHDRAW", tx_id),
		import_index: ImportIndex::new(index, 0),
		asset_id: asset.clone(),
		wallet: SPOT_WALLET.to_string(),
		change: -amount.clone(),
		operation: Operation::Withdraw,
		timestamp,
		tx_id: Some(tx_id.clone()),
		platform: PLATFORM.to_string(),
		provenance: ctx.provenance.clone(),
	}];
	if !fee.is_zero() {
		logs.push(AuditLog {
			id: format!("{}_FEE", tx_id),
			import_index: ImportIndex::new(index, 1),
			asset_id: asset.clone(),
			wallet: SPOT_WALLET.to_string(),
			change: -fee.clone(),
			operation: Operation::Fee,
			timestamp,
			tx_id: Some(tx_id.clone()),
			platform: PLATFORM.to_string(),
			provenance: ctx.provenance.clone(),
		});
	}

	let mut tx = Transaction::new(
		tx_id,
		TransactionType::Withdraw,
		timestamp,
		PLATFORM,
		SPOT_WALLET,
		ctx.provenance.clone(),
	);
	tx.outgoing = Some(amount);
	tx.outgoing_asset = Some(asset.clone());
	if !fee.is_zero() {
		tx.fee = Some(fee);
		tx.fee_asset = Some(asset);
	}
	transfer_metadata(&mut tx, raw);

	Ok(ParserOutput {
		logs,
		transactions: vec![tx],
	})
}

/// Legs of a fill: outflow, inflow, then fee.
fn fill_output(fill: Fill, index: u64, ctx: &ImportContext) -> ParserOutput {
	let (out_symbol, out_amount, in_symbol, in_amount) = if fill.is_buy {
		(&fill.quote, &fill.quote_amount, &fill.base, &fill.base_amount)
	} else {
		(&fill.base, &fill.base_amount, &fill.quote, &fill.quote_amount)
	};
	let out_amount = out_amount.abs();
	let in_amount = in_amount.abs();
	let fee = fill.fee.abs();

	let log = |suffix: &str, leg: u32, symbol: &str, change: BigDecimal, operation| AuditLog {
		id: format!("{}_{}", fill.tx_id, suffix),
		import_index: ImportIndex::new(index, leg),
		asset_id: asset_id(PLATFORM, symbol),
		wallet: SPOT_WALLET.to_string(),
		change,
		operation,
		timestamp: fill.timestamp,
		tx_id: Some(fill.tx_id.clone()),
		platform: PLATFORM.to_string(),
		provenance: ctx.provenance.clone(),
	};

	let mut logs = Vec::with_capacity(3);
	let mut leg = 0;
	if !out_amount.is_zero() {
		logs.push(log("SELL", leg, out_symbol.as_str(), -out_amount.clone(), Operation::Sell));
		leg += 1;
	}
	if !in_amount.is_zero() {
		logs.push(log("BUY", leg, in_symbol.as_str(), in_amount.clone(), Operation::Buy));
		leg += 1;
	}
	if !fee.is_zero() && !fill.fee_asset.is_empty() {
		logs.push(log("FEE", leg, fill.fee_asset.as_str(), -fee.clone(), Operation::Fee));
	}
	if logs.is_empty() {
		return ParserOutput::default();
	}

	let mut tx = Transaction::new(
		fill.tx_id.clone(),
		TransactionType::Swap,
		fill.timestamp,
		PLATFORM,
		SPOT_WALLET,
		ctx.provenance.clone(),
	);
	if !in_amount.is_zero() {
		tx.incoming = Some(in_amount);
		tx.incoming_asset = Some(asset_id(PLATFORM, in_symbol));
	}
	if !out_amount.is_zero() {
		tx.outgoing = Some(out_amount);
		tx.outgoing_asset = Some(asset_id(PLATFORM, out_symbol));
	}
	if !fee.is_zero() && !fill.fee_asset.is_empty() {
		tx.fee = Some(fee);
		tx.fee_asset = Some(asset_id(PLATFORM, &fill.fee_asset));
	}
	tx.derive_price();

	ParserOutput {
		logs,
		transactions: vec![tx],
	}
}

fn parse_side(side: &str) -> Result<bool, ParseError> {
	match side.trim().to_uppercase().as_str() {
		"BUY" => Ok(true),
		"SELL" => Ok(false),
		other => Err(ParseError::UnknownValue {
			field: "Side".to_string(),
			value: other.to_string(),
		}),
	}
}

fn amount_with_asset(
	field: &str,
	value: &str,
	known: &[&str],
) -> Result<(BigDecimal, String), ParseError> {
	split_amount_asset(value, known).ok_or_else(|| ParseError::InvalidAmount {
		field: field.to_string(),
		value: value.to_string(),
	})
}

fn is_void(raw: &RawRecord) -> bool {
	raw.get_non_empty("Status")
		.map(|status| VOID_STATUSES.contains(&status.to_lowercase().as_str()))
		.unwrap_or(false)
}

/// Prefer the on-chain hash; internal transfers have none, so fall back to the row content.
fn transfer_id(
	direction: &str,
	raw: &RawRecord,
	coin: &str,
	timestamp: i64,
	amount: &BigDecimal,
	ctx: &ImportContext,
) -> String {
	match raw.get_non_empty("TXID") {
		Some(hash) if !hash.starts_with("Internal transfer") => {
			format!("{}_{}_{}", PLATFORM, direction, id_part(&hash))
		}
		_ => ctx.content_id(format!(
			"{}_{}_{}_{}_{}",
			PLATFORM,
			direction,
			id_part(coin),
			timestamp,
			id_part(&format_amount(amount))
		)),
	}
}

fn transfer_metadata(tx: &mut Transaction, raw: &RawRecord) {
	for (field, key) in [("TXID", "txHash"), ("Network", "network"), ("Address", "address")] {
		if let Some(value) = raw.get_non_empty(field) {
			tx.metadata.insert(key.to_string(), value);
		}
	}
}
