use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::utils::{felt_to_hex, Address};

/// Largest precision whose scale factor still fits in `u128`.
pub const MAX_DECIMALS: u8 = 38;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHandle {
    pub address: Address,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

impl TokenHandle {
    pub fn new(address: Address, decimals: u8) -> Result<Self, ClientError> {
        if decimals > MAX_DECIMALS {
            return Err(ClientError::InvalidInput(format!(
                "decimals {decimals} exceeds {MAX_DECIMALS}"
            )));
        }
        Ok(Self {
            address,
            decimals,
            symbol: None,
        })
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn label(&self) -> String {
        self.symbol
            .clone()
            .unwrap_or_else(|| felt_to_hex(self.address))
    }

    pub fn parse_amount(&self, value: &str) -> Result<u128, ClientError> {
        parse_units(value, self.decimals)
    }

    pub fn format_amount(&self, amount: u128) -> String {
        format_units(amount, self.decimals)
    }
}

/// Parses a decimal string such as `"1.5"` into base units.
pub fn parse_units(value: &str, decimals: u8) -> Result<u128, ClientError> {
    if decimals > MAX_DECIMALS {
        return Err(ClientError::InvalidInput(format!(
            "decimals {decimals} exceeds {MAX_DECIMALS}"
        )));
    }
    let value = value.trim();
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (value, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(ClientError::InvalidInput("empty amount".to_string()));
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(ClientError::InvalidInput(format!("invalid amount {value}")));
    }
    if fraction.len() > usize::from(decimals) {
        return Err(ClientError::InvalidInput(format!(
            "amount {value} has more than {decimals} decimals"
        )));
    }

    let overflow = || ClientError::InvalidInput(format!("amount {value} exceeds u128"));
    let scale = 10u128.pow(u32::from(decimals));
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().map_err(|_| overflow())?
    };
    let fraction_units = if fraction.is_empty() {
        0
    } else {
        let padding = 10u128.pow(u32::from(decimals) - fraction.len() as u32);
        fraction.parse::<u128>().map_err(|_| overflow())? * padding
    };
    whole_units
        .checked_mul(scale)
        .and_then(|units| units.checked_add(fraction_units))
        .ok_or_else(overflow)
}

/// Renders base units as a decimal string without trailing zeros.
pub fn format_units(amount: u128, decimals: u8) -> String {
    let decimals = decimals.min(MAX_DECIMALS);
    if decimals == 0 {
        return amount.to_string();
    }
    let scale = 10u128.pow(u32::from(decimals));
    let whole = amount / scale;
    let fraction = amount % scale;
    if fraction == 0 {
        return whole.to_string();
    }
    let digits = format!("{:0width$}", fraction, width = usize::from(decimals));
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use starknet::core::types::Felt;

    #[test]
    fn parses_human_amounts() {
        assert_eq!(parse_units("100", 6).expect("units"), 100_000_000);
        assert_eq!(parse_units("1.5", 18).expect("units"), 1_500_000_000_000_000_000);
        assert_eq!(parse_units(".25", 2).expect("units"), 25);
        assert_eq!(parse_units("7", 0).expect("units"), 7);
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert!(parse_units("", 6).is_err());
        assert!(parse_units("1.2.3", 6).is_err());
        assert!(parse_units("-1", 6).is_err());
        assert!(parse_units("0.1234567", 6).is_err());
        assert!(parse_units("1", 39).is_err());
        assert!(parse_units("340282366920938463463374607431768211456", 0).is_err());
    }

    #[test]
    fn formats_base_units() {
        assert_eq!(format_units(100_000_000, 6), "100");
        assert_eq!(format_units(1_500_000, 6), "1.5");
        assert_eq!(format_units(1, 18), "0.000000000000000001");
        assert_eq!(format_units(42, 0), "42");
    }

    #[test]
    fn label_prefers_symbol() {
        let token = TokenHandle::new(Felt::from(0xabu8), 6).expect("token");
        assert_eq!(token.label(), "0xab");
        assert_eq!(token.with_symbol("USDC").label(), "USDC");
    }
}
