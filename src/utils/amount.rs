use bigdecimal::BigDecimal;
use std::str::FromStr;

/// Symbols treated as the quote side of a trade when deriving prices. Longest first so that
/// pair splitting prefers `USDT` over `USD`.
const QUOTE_SYMBOLS: [&str; 14] = [
	"FDUSD", "USDT", "USDC", "BUSD", "TUSD", "USDP", "DAI", "USD", "EUR", "GBP", "TRY", "BRL",
	"BTC", "ETH",
];

/// Fiat and stablecoins; `BTC`/`ETH` only count as quotes when splitting pairs.
const PRICE_QUOTE_SYMBOLS: [&str; 12] = [
	"FDUSD", "USDT", "USDC", "BUSD", "TUSD", "USDP", "DAI", "USD", "EUR", "GBP", "TRY", "BRL",
];

/// Parse a decimal string as exported by exchanges (`"1,234.50"`, `" -0.1 "`).
pub fn parse_decimal(value: &str) -> Option<BigDecimal> {
	let cleaned: String = value.trim().chars().filter(|c| *c != ',').collect();
	if cleaned.is_empty() {
		return None;
	}
	BigDecimal::from_str(&cleaned).ok()
}

/// Split an amount with a trailing asset symbol, e.g. `"1.5BTC"` -> `(1.5, "BTC")`.
///
/// `known` symbols are tried first, longest first, so tickers that start with a digit
/// (`"10.51INCH"` with `1INCH`) split correctly. Otherwise the split is at the first letter.
pub fn split_amount_asset(value: &str, known: &[&str]) -> Option<(BigDecimal, String)> {
	let value = value.trim();
	let mut known: Vec<&str> = known.iter().copied().filter(|s| !s.is_empty()).collect();
	known.sort_by_key(|symbol| std::cmp::Reverse(symbol.len()));
	for symbol in known {
		let Some(split_at) = value.len().checked_sub(symbol.len()) else {
			continue;
		};
		let (Some(amount), Some(suffix)) = (value.get(..split_at), value.get(split_at..)) else {
			continue;
		};
		if suffix.eq_ignore_ascii_case(symbol) {
			if let Some(amount) = parse_decimal(amount) {
				return Some((amount, symbol.to_uppercase()));
			}
		}
	}

	let split_at = value
		.char_indices()
		.find(|(_, c)| c.is_ascii_alphabetic())
		.map(|(i, _)| i)?;
	let (amount, symbol) = value.split_at(split_at);
	let amount = parse_decimal(amount)?;
	if symbol.is_empty() {
		return None;
	}
	Some((amount, symbol.to_string()))
}

/// Split a concatenated trading pair such as `BTCUSDT` into `(base, quote)`.
pub fn split_pair(pair: &str) -> Option<(String, String)> {
	let pair = pair.trim().to_uppercase().replace(['/', '-', '_'], "");
	QUOTE_SYMBOLS.iter().find_map(|quote| {
		pair.strip_suffix(quote)
			.filter(|base| !base.is_empty())
			.map(|base| (base.to_string(), quote.to_string()))
	})
}

/// Whether `symbol` (bare or namespaced `platform:symbol`) is a fiat or stablecoin quote.
pub fn is_quote_symbol(symbol: &str) -> bool {
	let bare = symbol.rsplit(':').next().unwrap_or(symbol);
	PRICE_QUOTE_SYMBOLS.contains(&bare.to_uppercase().as_str())
}

/// Human readable amount without trailing zeros.
pub fn format_amount(amount: &BigDecimal) -> String {
	amount.normalized().to_plain_string()
}
