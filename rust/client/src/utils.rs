use num_bigint::BigUint;
use num_traits::ToPrimitive;
use starknet::core::types::{Event, Felt, TransactionReceipt};

use crate::error::ClientError;

pub type Address = Felt;
pub type TxHash = Felt;

const STARK_FIELD_MODULUS_HEX: &str =
    "800000000000011000000000000000000000000000000000000000000000001";

pub fn parse_felt(value: &str) -> Result<Felt, ClientError> {
    if value.starts_with("0x") {
        Felt::from_hex(value).map_err(|_| ClientError::InvalidInput("invalid felt".to_string()))
    } else {
        Felt::from_dec_str(value).map_err(|_| ClientError::InvalidInput("invalid felt".to_string()))
    }
}

pub fn felt_to_hex(value: Felt) -> String {
    format!("0x{:x}", value)
}

/// Fixed-width lowercase hex, so string order matches numeric order.
pub fn felt_to_padded_hex(value: Felt) -> String {
    format!("0x{}", hex::encode(value.to_bytes_be()))
}

pub fn felt_to_u128(value: &Felt) -> Result<u128, ClientError> {
    let bytes = value.to_bytes_be();
    if bytes[..16].iter().any(|b| *b != 0) {
        return Err(ClientError::InvalidInput("felt exceeds u128".to_string()));
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(&bytes[16..32]);
    Ok(u128::from_be_bytes(buf))
}

pub fn felt_to_u32(value: &Felt) -> Result<u32, ClientError> {
    let wide = felt_to_u128(value)?;
    u32::try_from(wide).map_err(|_| ClientError::InvalidInput("felt exceeds u32".to_string()))
}

/// Encodes an amount as the `(low, high)` words of a Cairo `u256`.
pub fn u128_to_u256_felts(value: u128) -> [Felt; 2] {
    [Felt::from(value), Felt::ZERO]
}

/// Decodes a Cairo `u256`, rejecting values that do not fit in `u128`.
pub fn u256_felts_to_u128(low: &Felt, high: &Felt) -> Result<u128, ClientError> {
    if *high != Felt::ZERO {
        return Err(ClientError::InvalidInput("u256 exceeds u128".to_string()));
    }
    felt_to_u128(low)
}

/// Decodes a Cairo `u256`, clamping anything above `u128::MAX`.
///
/// Allowances are commonly set to the maximum `u256`; for gating purposes that
/// is indistinguishable from `u128::MAX`.
pub fn u256_felts_to_u128_saturating(low: &Felt, high: &Felt) -> Result<u128, ClientError> {
    if *high != Felt::ZERO {
        return Ok(u128::MAX);
    }
    felt_to_u128(low)
}

pub fn i32_to_felt(value: i32) -> Result<Felt, ClientError> {
    if value >= 0 {
        Ok(Felt::from(value as u64))
    } else {
        let modulus = stark_field_modulus()?;
        let mag = BigUint::from(value.unsigned_abs());
        let result = modulus - mag;
        let bytes = result.to_bytes_be();
        let mut out = [0u8; 32];
        out[32 - bytes.len()..].copy_from_slice(&bytes);
        Ok(Felt::from_bytes_be(&out))
    }
}

pub fn felt_to_i32(value: &Felt) -> Result<i32, ClientError> {
    let modulus = stark_field_modulus()?;
    let as_big = felt_to_biguint(value);
    let max = BigUint::from(i32::MAX as u32);
    if as_big <= max {
        return as_big
            .to_i32()
            .ok_or_else(|| ClientError::InvalidInput("felt out of i32 range".to_string()));
    }

    let min_abs = BigUint::from(1u32) << 31;
    let lower_bound = &modulus - &min_abs;
    if as_big < lower_bound {
        return Err(ClientError::InvalidInput("felt out of i32 range".to_string()));
    }

    let mag = &modulus - &as_big;
    let mag_u32 = mag
        .to_u32()
        .ok_or_else(|| ClientError::InvalidInput("felt out of i32 range".to_string()))?;
    if mag_u32 == 0 || mag_u32 > (1u32 << 31) {
        return Err(ClientError::InvalidInput("felt out of i32 range".to_string()));
    }
    if mag_u32 == (1u32 << 31) {
        return Ok(i32::MIN);
    }
    Ok(-(mag_u32 as i32))
}

pub trait StarknetEvent: Sized {
    const NAME: &'static str;

    fn from_event(data: &[Felt]) -> Option<Self>;

    fn selector() -> Option<Felt> {
        starknet::core::utils::get_selector_from_name(Self::NAME).ok()
    }
}

/// Returns the first event of type `T` emitted by `emitter` in `receipt`.
pub fn parse_event<T: StarknetEvent>(receipt: &TransactionReceipt, emitter: Address) -> Option<T> {
    let selector = T::selector()?;
    receipt_events(receipt)
        .iter()
        .filter(|event| event.from_address == emitter)
        .find(|event| event.keys.first().copied() == Some(selector))
        .and_then(|event| T::from_event(&event.data))
}

pub(crate) fn receipt_events(receipt: &TransactionReceipt) -> &[Event] {
    match receipt {
        TransactionReceipt::Invoke(inner) => &inner.events,
        TransactionReceipt::L1Handler(inner) => &inner.events,
        TransactionReceipt::Declare(inner) => &inner.events,
        TransactionReceipt::Deploy(inner) => &inner.events,
        TransactionReceipt::DeployAccount(inner) => &inner.events,
    }
}

fn stark_field_modulus() -> Result<BigUint, ClientError> {
    BigUint::parse_bytes(STARK_FIELD_MODULUS_HEX.as_bytes(), 16)
        .ok_or_else(|| ClientError::InvalidInput("invalid Stark modulus".to_string()))
}

fn felt_to_biguint(felt: &Felt) -> BigUint {
    BigUint::from_bytes_be(&felt.to_bytes_be())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_ticks_roundtrip_through_field() {
        for tick in [-887272, -60, -1, 0, 1, 887272] {
            let felt = i32_to_felt(tick).expect("encode");
            assert_eq!(felt_to_i32(&felt).expect("decode"), tick);
        }
    }

    #[test]
    fn negative_tick_is_field_complement() {
        let felt = i32_to_felt(-1).expect("encode");
        assert_eq!(felt + Felt::ONE, Felt::ZERO);
    }

    #[test]
    fn u256_high_word_rejected_or_clamped() {
        let low = Felt::from(5u8);
        assert_eq!(u256_felts_to_u128(&low, &Felt::ZERO).expect("fits"), 5);
        assert!(u256_felts_to_u128(&low, &Felt::ONE).is_err());
        assert_eq!(
            u256_felts_to_u128_saturating(&low, &Felt::ONE).expect("clamp"),
            u128::MAX
        );
    }

    #[test]
    fn padded_hex_is_fixed_width() {
        let short = felt_to_padded_hex(Felt::from(0xabu8));
        assert_eq!(short.len(), 66);
        assert!(short.ends_with("ab"));
        assert!(short.starts_with("0x0000"));
    }

    #[test]
    fn parse_felt_accepts_hex_and_decimal() {
        assert_eq!(parse_felt("0x10").expect("hex"), Felt::from(16u8));
        assert_eq!(parse_felt("16").expect("dec"), Felt::from(16u8));
        assert!(parse_felt("zz").is_err());
    }
}
