/// Canonical WETH9 contract on Ethereum mainnet.
pub const WETH_CONTRACT: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";

/// Lowercase `0x`-prefixed form of a 20-byte EVM address, or `None` when it is not one.
pub fn normalize_evm_address(address: &str) -> Option<String> {
	let trimmed = address.trim();
	let body = trimmed
		.strip_prefix("0x")
		.or_else(|| trimmed.strip_prefix("0X"))
		.unwrap_or(trimmed);
	let bytes = hex::decode(body).ok()?;
	if bytes.len() != 20 {
		return None;
	}
	Some(format!("0x{}", hex::encode(bytes)))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn normalizes_checksummed_address() {
		assert_eq!(
			normalize_evm_address("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2").as_deref(),
			Some(WETH_CONTRACT)
		);
	}

	#[test]
	fn rejects_wrong_length_or_non_hex() {
		assert!(normalize_evm_address("0x1234").is_none());
		assert!(normalize_evm_address("0xzz2aaa39b223fe8d0a0e5c4f27ead9083c756cc2").is_none());
	}
}
