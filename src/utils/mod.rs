//! Utility module for the ledger engine.
//!
//! Re-exports amount and address helpers used by parsers and the extraction engine.

/// Decimal amount parsing and formatting
pub mod amount;
/// EVM address normalization
pub mod address;

pub use address::{WETH_CONTRACT, normalize_evm_address};
pub use amount::{format_amount, is_quote_symbol, parse_decimal, split_amount_asset, split_pair};
