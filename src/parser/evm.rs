use super::{ImportContext, ParseError, ParserOutput, id_part, parse_timestamp_ms, required};
use crate::ledger::{AuditLog, ImportIndex, Operation, Transaction, TransactionType, asset_id};
use crate::source::RawRecord;
use crate::utils::normalize_evm_address;
use bigdecimal::{BigDecimal, Zero};
use std::str::FromStr;

pub const PLATFORM: &str = "ethereum";
pub const NATIVE_SYMBOL: &str = "ETH";
const WEI_DECIMALS: u32 = 18;

/// Explorer `txlist` record (normal transaction).
///
/// Produces value legs relative to the context's wallet address (outflow before inflow) followed
/// by the gas fee leg when the wallet paid for the transaction. Reverted transactions keep only
/// the fee. A Transaction is emitted only when value moved.
pub fn parse_normal(
	raw: &RawRecord,
	index: u64,
	ctx: &ImportContext,
) -> Result<ParserOutput, ParseError> {
	let wallet = own_address(ctx)?;
	let hash = required(raw, "hash")?;
	let timestamp = parse_timestamp_ms(&required(raw, "timeStamp")?)?;
	let from = address_field(raw, "from")?;
	let to = raw
		.get_non_empty("to")
		.and_then(|to| normalize_evm_address(&to))
		.or_else(|| raw.get_non_empty("contractAddress").and_then(|c| normalize_evm_address(&c)));
	let failed = raw.get_str("isError").as_deref() == Some("1");
	let value = if failed {
		BigDecimal::zero()
	} else {
		wei_to_ether("value", &required(raw, "value")?)?
	};

	let is_sender = from == wallet;
	let is_receiver = to.as_deref() == Some(wallet.as_str());
	let tx_id = format!("{}_{}", PLATFORM, id_part(&hash));
	let asset = asset_id(PLATFORM, NATIVE_SYMBOL);

	let mut legs = Legs::new(&tx_id, index, timestamp, &wallet, ctx);
	if !value.is_zero() && is_sender {
		legs.push("VALUE_OUT", &asset, -value.clone(), Operation::Withdraw);
	}
	if !value.is_zero() && is_receiver {
		legs.push("VALUE_IN", &asset, value.clone(), Operation::Deposit);
	}
	if is_sender {
		let gas_used = required_decimal_field(raw, "gasUsed")?;
		let gas_price = wei_to_ether("gasPrice", &required(raw, "gasPrice")?)?;
		let fee = gas_used * gas_price;
		if !fee.is_zero() {
			legs.push("FEE", &asset, -fee, Operation::Fee);
		}
	}

	let mut transactions = Vec::new();
	if !value.is_zero() && (is_sender != is_receiver) {
		let tx_type = if is_sender {
			TransactionType::Withdraw
		} else {
			TransactionType::Deposit
		};
		let mut tx = Transaction::new(
			tx_id.clone(),
			tx_type,
			timestamp,
			PLATFORM,
			&wallet,
			ctx.provenance.clone(),
		);
		if is_sender {
			tx.outgoing = Some(value);
			tx.outgoing_asset = Some(asset.clone());
			if let Some(fee) = legs.fee() {
				tx.fee = Some(fee);
				tx.fee_asset = Some(asset.clone());
			}
		} else {
			tx.incoming = Some(value);
			tx.incoming_asset = Some(asset.clone());
		}
		tx.metadata.insert("txHash".to_string(), hash.clone());
		tx.metadata.insert("from".to_string(), from.clone());
		if let Some(to) = &to {
			tx.metadata.insert("to".to_string(), to.clone());
		}
		if let Some(method) = raw.get_non_empty("functionName") {
			tx.metadata.insert("method".to_string(), method);
		}
		transactions.push(tx);
	}

	Ok(ParserOutput {
		logs: legs.into_logs(),
		transactions,
	})
}

/// Explorer `txlistinternal` record: value moved by a contract call. No fee of its own.
pub fn parse_internal(
	raw: &RawRecord,
	index: u64,
	ctx: &ImportContext,
) -> Result<ParserOutput, ParseError> {
	let wallet = own_address(ctx)?;
	if raw.get_str("isError").as_deref() == Some("1") {
		return Ok(ParserOutput::default());
	}
	let hash = required(raw, "hash")?;
	let trace_id = raw.get_non_empty("traceId").unwrap_or_else(|| "0".to_string());
	let timestamp = parse_timestamp_ms(&required(raw, "timeStamp")?)?;
	let from = address_field(raw, "from")?;
	let to = address_field(raw, "to")?;
	let value = wei_to_ether("value", &required(raw, "value")?)?;
	if value.is_zero() || (from != wallet && to != wallet) || from == to {
		return Ok(ParserOutput::default());
	}

	let tx_id = format!(
		"{}_{}_INTERNAL_{}",
		PLATFORM,
		id_part(&hash),
		id_part(&trace_id)
	);
	let asset = asset_id(PLATFORM, NATIVE_SYMBOL);
	let incoming = to == wallet;

	let mut legs = Legs::new(&tx_id, index, timestamp, &wallet, ctx);
	let mut tx = if incoming {
		legs.push("VALUE_IN", &asset, value.clone(), Operation::Deposit);
		let mut tx = Transaction::new(
			tx_id.clone(),
			TransactionType::Deposit,
			timestamp,
			PLATFORM,
			&wallet,
			ctx.provenance.clone(),
		);
		tx.incoming = Some(value);
		tx.incoming_asset = Some(asset);
		tx
	} else {
		legs.push("VALUE_OUT", &asset, -value.clone(), Operation::Withdraw);
		let mut tx = Transaction::new(
			tx_id.clone(),
			TransactionType::Withdraw,
			timestamp,
			PLATFORM,
			&wallet,
			ctx.provenance.clone(),
		);
		tx.outgoing = Some(value);
		tx.outgoing_asset = Some(asset);
		tx
	};
	tx.metadata.insert("txHash".to_string(), hash);
	tx.metadata.insert("from".to_string(), from);
	tx.metadata.insert("to".to_string(), to);
	tx.metadata.insert("internal".to_string(), "true".to_string());

	Ok(ParserOutput {
		logs: legs.into_logs(),
		transactions: vec![tx],
	})
}

/// Accumulates the legs of one record with consecutive leg numbers.
struct Legs<'a> {
	tx_id: &'a str,
	next: ImportIndex,
	timestamp: i64,
	wallet: &'a str,
	ctx: &'a ImportContext,
	logs: Vec<AuditLog>,
}

impl<'a> Legs<'a> {
	fn new(
		tx_id: &'a str,
		index: u64,
		timestamp: i64,
		wallet: &'a str,
		ctx: &'a ImportContext,
	) -> Self {
		Self {
			tx_id,
			next: ImportIndex::new(index, 0),
			timestamp,
			wallet,
			ctx,
			logs: Vec::new(),
		}
	}

	fn push(&mut self, suffix: &str, asset: &str, change: BigDecimal, operation: Operation) {
		self.logs.push(AuditLog {
			id: format!("{}_{}", self.tx_id, suffix),
			import_index: self.next,
			asset_id: asset.to_string(),
			wallet: self.wallet.to_string(),
			change,
			operation,
			timestamp: self.timestamp,
			tx_id: Some(self.tx_id.to_string()),
			platform: PLATFORM.to_string(),
			provenance: self.ctx.provenance.clone(),
		});
		self.next = self.next.next_leg();
	}

	fn fee(&self) -> Option<BigDecimal> {
		self.logs
			.iter()
			.find(|log| log.operation == Operation::Fee)
			.map(|log| log.change.abs())
	}

	fn into_logs(self) -> Vec<AuditLog> {
		self.logs
	}
}

fn own_address(ctx: &ImportContext) -> Result<String, ParseError> {
	ctx.wallet_address
		.as_deref()
		.and_then(normalize_evm_address)
		.ok_or_else(|| ParseError::MissingContext("wallet address".to_string()))
}

fn address_field(raw: &RawRecord, field: &str) -> Result<String, ParseError> {
	let value = required(raw, field)?;
	normalize_evm_address(&value).ok_or(ParseError::UnknownValue {
		field: field.to_string(),
		value,
	})
}

fn required_decimal_field(raw: &RawRecord, field: &str) -> Result<BigDecimal, ParseError> {
	let value = required(raw, field)?;
	BigDecimal::from_str(value.trim()).map_err(|_| ParseError::InvalidAmount {
		field: field.to_string(),
		value,
	})
}

/// Integer wei string to ether.
fn wei_to_ether(field: &str, wei: &str) -> Result<BigDecimal, ParseError> {
	let wei = wei.trim();
	if wei.is_empty() || !wei.chars().all(|c| c.is_ascii_digit()) {
		return Err(ParseError::InvalidAmount {
			field: field.to_string(),
			value: wei.to_string(),
		});
	}
	BigDecimal::from_str(&format!("{}e-{}", wei, WEI_DECIMALS)).map_err(|_| {
		ParseError::InvalidAmount {
			field: field.to_string(),
			value: wei.to_string(),
		}
	})
}
