//! Adapter domain events and the canonical pair key they are grouped by.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use starknet::core::types::{Felt, TransactionReceipt};
use tokio::time::timeout;

use crate::error::ClientError;
use crate::liquidity::PositionId;
use crate::protocol::AdapterProtocol;
use crate::utils::{
    felt_to_hex, felt_to_i32, felt_to_padded_hex, felt_to_u32, receipt_events,
    u256_felts_to_u128, Address, StarknetEvent, TxHash,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiquidityAdded {
    pub position_id: PositionId,
    pub token_a: Address,
    pub token_b: Address,
    pub fee: u32,
    pub amount_a: u128,
    pub amount_b: u128,
    pub tick_lower: i32,
    pub tick_upper: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiquidityRemoved {
    pub position_id: PositionId,
    pub token_a: Address,
    pub token_b: Address,
    pub fee: u32,
    pub amount0: u128,
    pub amount1: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokensSwapped {
    pub token_in: Address,
    pub token_out: Address,
    pub fee: u32,
    pub amount_in: u128,
    pub amount_out: u128,
}

impl StarknetEvent for LiquidityAdded {
    const NAME: &'static str = "LiquidityAdded";

    fn from_event(data: &[Felt]) -> Option<Self> {
        if data.len() < 11 {
            return None;
        }
        Some(Self {
            position_id: PositionId(u256_felts_to_u128(&data[0], &data[1]).ok()?),
            token_a: data[2],
            token_b: data[3],
            fee: felt_to_u32(&data[4]).ok()?,
            amount_a: u256_felts_to_u128(&data[5], &data[6]).ok()?,
            amount_b: u256_felts_to_u128(&data[7], &data[8]).ok()?,
            tick_lower: felt_to_i32(&data[9]).ok()?,
            tick_upper: felt_to_i32(&data[10]).ok()?,
        })
    }
}

impl StarknetEvent for LiquidityRemoved {
    const NAME: &'static str = "LiquidityRemoved";

    fn from_event(data: &[Felt]) -> Option<Self> {
        if data.len() < 9 {
            return None;
        }
        Some(Self {
            position_id: PositionId(u256_felts_to_u128(&data[0], &data[1]).ok()?),
            token_a: data[2],
            token_b: data[3],
            fee: felt_to_u32(&data[4]).ok()?,
            amount0: u256_felts_to_u128(&data[5], &data[6]).ok()?,
            amount1: u256_felts_to_u128(&data[7], &data[8]).ok()?,
        })
    }
}

impl StarknetEvent for TokensSwapped {
    const NAME: &'static str = "TokensSwapped";

    fn from_event(data: &[Felt]) -> Option<Self> {
        if data.len() < 7 {
            return None;
        }
        Some(Self {
            token_in: data[0],
            token_out: data[1],
            fee: felt_to_u32(&data[2]).ok()?,
            amount_in: u256_felts_to_u128(&data[3], &data[4]).ok()?,
            amount_out: u256_felts_to_u128(&data[5], &data[6]).ok()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum AdapterEvent {
    LiquidityAdded(LiquidityAdded),
    LiquidityRemoved(LiquidityRemoved),
    TokensSwapped(TokensSwapped),
}

impl AdapterEvent {
    pub fn pair_key(&self) -> PairKey {
        match self {
            AdapterEvent::LiquidityAdded(event) => PairKey::new(event.token_a, event.token_b),
            AdapterEvent::LiquidityRemoved(event) => PairKey::new(event.token_a, event.token_b),
            AdapterEvent::TokensSwapped(event) => PairKey::new(event.token_in, event.token_out),
        }
    }

    /// Decodes one raw event by its selector key. Unknown selectors and
    /// malformed payloads yield `None`.
    pub fn decode(keys: &[Felt], data: &[Felt]) -> Option<Self> {
        let selector = *keys.first()?;
        if Some(selector) == LiquidityAdded::selector() {
            LiquidityAdded::from_event(data).map(AdapterEvent::LiquidityAdded)
        } else if Some(selector) == LiquidityRemoved::selector() {
            LiquidityRemoved::from_event(data).map(AdapterEvent::LiquidityRemoved)
        } else if Some(selector) == TokensSwapped::selector() {
            TokensSwapped::from_event(data).map(AdapterEvent::TokensSwapped)
        } else {
            None
        }
    }
}

/// Unordered token pair. Both orderings of the same two tokens produce the
/// same key; the display form is `<lower>-<higher>` in fixed-width hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    first: Address,
    second: Address,
}

impl PairKey {
    pub fn new(token_a: Address, token_b: Address) -> Self {
        if felt_to_padded_hex(token_a) <= felt_to_padded_hex(token_b) {
            Self {
                first: token_a,
                second: token_b,
            }
        } else {
            Self {
                first: token_b,
                second: token_a,
            }
        }
    }

    pub fn tokens(&self) -> (Address, Address) {
        (self.first, self.second)
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            felt_to_padded_hex(self.first),
            felt_to_padded_hex(self.second)
        )
    }
}

impl Serialize for PairKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// All adapter events emitted by `adapter` in a receipt, in emission order.
pub fn decode_receipt_events(receipt: &TransactionReceipt, adapter: Address) -> Vec<AdapterEvent> {
    receipt_events(receipt)
        .iter()
        .filter(|event| event.from_address == adapter)
        .filter_map(|event| AdapterEvent::decode(&event.keys, &event.data))
        .collect()
}

/// Waits for `tx_hash` to settle and picks the first matching event.
pub(crate) async fn confirm_event<P, T, F>(
    protocol: &P,
    tx_hash: TxHash,
    limit: Duration,
    pick: F,
) -> Result<T, ClientError>
where
    P: AdapterProtocol + ?Sized,
    F: Fn(AdapterEvent) -> Option<T>,
{
    let events = timeout(limit, protocol.wait_for_finality(tx_hash))
        .await
        .map_err(|_| ClientError::Timeout(format!("finality of {}", felt_to_hex(tx_hash))))??;
    events.into_iter().find_map(pick).ok_or_else(|| {
        ClientError::Rpc(format!(
            "transaction {} emitted no matching adapter event",
            felt_to_hex(tx_hash)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::i32_to_felt;

    #[test]
    fn pair_key_ignores_order() {
        let usdc = Felt::from_hex_unchecked("0x53c91253bc9682c04929ca02ed00b3e423f6710d2ee7e0d5ebb06f3ecf368a8");
        let weth = Felt::from_hex_unchecked("0x49d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7");
        let forward = PairKey::new(usdc, weth);
        let backward = PairKey::new(weth, usdc);
        assert_eq!(forward, backward);
        assert_eq!(forward.tokens(), (weth, usdc));
        assert_eq!(
            forward.to_string(),
            format!("{}-{}", felt_to_padded_hex(weth), felt_to_padded_hex(usdc))
        );
    }

    #[test]
    fn pair_key_uses_fixed_width_ordering() {
        // 0xf < 0x10 numerically; unpadded strings would order them the other way.
        let key = PairKey::new(Felt::from(0x10u8), Felt::from(0xfu8));
        assert_eq!(key.tokens(), (Felt::from(0xfu8), Felt::from(0x10u8)));
    }

    #[test]
    fn decodes_liquidity_added_payload() {
        let data = vec![
            Felt::from(42u8),
            Felt::ZERO,
            Felt::from(1u8),
            Felt::from(2u8),
            Felt::from(3000u32),
            Felt::from(900u32),
            Felt::ZERO,
            Felt::from(800u32),
            Felt::ZERO,
            i32_to_felt(-600).expect("tick"),
            i32_to_felt(600).expect("tick"),
        ];
        let keys = vec![LiquidityAdded::selector().expect("selector")];
        let event = AdapterEvent::decode(&keys, &data).expect("decoded");
        let added = match event {
            AdapterEvent::LiquidityAdded(added) => added,
            other => panic!("unexpected event {other:?}"),
        };
        assert_eq!(added.position_id, PositionId(42));
        assert_eq!(added.amount_a, 900);
        assert_eq!(added.amount_b, 800);
        assert_eq!(added.tick_lower, -600);
        assert_eq!(added.tick_upper, 600);
    }

    #[test]
    fn short_or_unknown_payloads_are_skipped() {
        let keys = vec![TokensSwapped::selector().expect("selector")];
        assert!(AdapterEvent::decode(&keys, &[Felt::ONE]).is_none());
        assert!(AdapterEvent::decode(&[Felt::from(5u8)], &[]).is_none());
        assert!(AdapterEvent::decode(&[], &[]).is_none());
    }
}
