//! Usable tick ranges around the live pool price.

use starknet::core::types::Felt;

use crate::error::ClientError;
use crate::protocol::AdapterProtocol;
use crate::utils::Address;

/// Number of tick spacings placed on each side of the current price.
pub const DEFAULT_TICK_WIDTH: u32 = 20;

pub const MIN_TICK: i32 = -887_272;
pub const MAX_TICK: i32 = 887_272;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolTickState {
    pub pool: Address,
    pub current_tick: i32,
    pub tick_spacing: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRange {
    pub lower: i32,
    pub upper: i32,
    pub spacing: i32,
}

impl TickRange {
    /// Validates a caller-supplied range against a pool's tick spacing.
    pub fn new(lower: i32, upper: i32, spacing: i32) -> Result<Self, ClientError> {
        if spacing <= 0 {
            return Err(ClientError::InvalidPoolState(format!(
                "tick spacing must be positive, got {spacing}"
            )));
        }
        if lower >= upper {
            return Err(ClientError::InvalidInput(format!(
                "tick lower {lower} must be below tick upper {upper}"
            )));
        }
        if lower.rem_euclid(spacing) != 0 || upper.rem_euclid(spacing) != 0 {
            return Err(ClientError::InvalidInput(format!(
                "ticks {lower}..{upper} are not multiples of spacing {spacing}"
            )));
        }
        Ok(Self {
            lower,
            upper,
            spacing,
        })
    }

    pub fn within_protocol_bounds(&self) -> bool {
        self.lower >= MIN_TICK && self.upper <= MAX_TICK
    }

    pub fn width_in_ticks(&self) -> i64 {
        i64::from(self.upper) - i64::from(self.lower)
    }
}

/// Rounds `current_tick` down to the nearest multiple of `tick_spacing`.
///
/// Floors toward negative infinity, so `-7` with spacing `10` yields `-10`.
pub fn nearest_usable_tick(current_tick: i32, tick_spacing: i32) -> Result<i32, ClientError> {
    if tick_spacing <= 0 {
        return Err(ClientError::InvalidPoolState(format!(
            "tick spacing must be positive, got {tick_spacing}"
        )));
    }
    let floored = i64::from(current_tick.div_euclid(tick_spacing)) * i64::from(tick_spacing);
    i32::try_from(floored).map_err(|_| {
        ClientError::InvalidInput(format!(
            "tick {current_tick} has no usable tick at spacing {tick_spacing}"
        ))
    })
}

/// `width` spacings either side of the floored tick. A width of zero would
/// collapse the range to a single tick and is rejected.
pub fn compute_tick_range(state: &PoolTickState, width: u32) -> Result<TickRange, ClientError> {
    let nearest = nearest_usable_tick(state.current_tick, state.tick_spacing)?;
    if width == 0 {
        return Err(ClientError::InvalidInput(
            "tick width must be positive".to_string(),
        ));
    }
    let offset = i64::from(state.tick_spacing) * i64::from(width);
    let lower = i32::try_from(i64::from(nearest) - offset)
        .map_err(|_| ClientError::InvalidInput("tick lower overflows i32".to_string()))?;
    let upper = i32::try_from(i64::from(nearest) + offset)
        .map_err(|_| ClientError::InvalidInput("tick upper overflows i32".to_string()))?;
    Ok(TickRange {
        lower,
        upper,
        spacing: state.tick_spacing,
    })
}

/// Resolves the pool for a pair and reads its tick state.
///
/// A zero pool address from the factory means the pair/fee has no pool.
pub async fn fetch_pool_tick_state<P>(
    protocol: &P,
    token_a: Address,
    token_b: Address,
    fee: u32,
) -> Result<PoolTickState, ClientError>
where
    P: AdapterProtocol + ?Sized,
{
    let pool = protocol.get_pool(token_a, token_b, fee).await?;
    if pool == Felt::ZERO {
        return Err(ClientError::PoolNotFound {
            token_a,
            token_b,
            fee,
        });
    }
    let current_tick = protocol.current_tick(pool).await?;
    let tick_spacing = protocol.tick_spacing(pool).await?;
    Ok(PoolTickState {
        pool,
        current_tick,
        tick_spacing,
    })
}

pub async fn resolve_tick_range<P>(
    protocol: &P,
    token_a: Address,
    token_b: Address,
    fee: u32,
    width: u32,
) -> Result<(PoolTickState, TickRange), ClientError>
where
    P: AdapterProtocol + ?Sized,
{
    let state = fetch_pool_tick_state(protocol, token_a, token_b, fee).await?;
    let range = compute_tick_range(&state, width)?;
    tracing::debug!(
        pool = %state.pool,
        current_tick = state.current_tick,
        tick_spacing = state.tick_spacing,
        lower = range.lower,
        upper = range.upper,
        "resolved tick range"
    );
    Ok((state, range))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(current_tick: i32, tick_spacing: i32) -> PoolTickState {
        PoolTickState {
            pool: Felt::from(1u8),
            current_tick,
            tick_spacing,
        }
    }

    #[test]
    fn floors_negative_ticks() {
        assert_eq!(nearest_usable_tick(-7, 10).expect("tick"), -10);
        assert_eq!(nearest_usable_tick(-10, 10).expect("tick"), -10);
        assert_eq!(nearest_usable_tick(7, 10).expect("tick"), 0);
    }

    #[test]
    fn floors_at_i32_extremes() {
        assert!(matches!(
            nearest_usable_tick(i32::MIN, 3),
            Err(ClientError::InvalidInput(_))
        ));
        assert_eq!(nearest_usable_tick(i32::MIN, 2).expect("tick"), i32::MIN);
        assert_eq!(nearest_usable_tick(i32::MAX, 3).expect("tick"), 2_147_483_646);
        assert_eq!(nearest_usable_tick(i32::MAX, 60).expect("tick"), 2_147_483_640);
    }

    #[test]
    fn zero_width_is_rejected() {
        assert!(matches!(
            compute_tick_range(&state(0, 60), 0),
            Err(ClientError::InvalidInput(_))
        ));
    }

    #[test]
    fn mainnet_style_range() {
        let range = compute_tick_range(&state(123_456, 60), DEFAULT_TICK_WIDTH).expect("range");
        assert_eq!(nearest_usable_tick(123_456, 60).expect("tick"), 123_420);
        assert_eq!(range.lower, 122_220);
        assert_eq!(range.upper, 124_620);
    }

    #[test]
    fn range_width_and_alignment_hold() {
        for spacing in [1, 10, 60, 200] {
            for tick in [-100_001, -61, -1, 0, 59, 77_777] {
                for width in [1u32, 5, 20] {
                    let range = compute_tick_range(&state(tick, spacing), width).expect("range");
                    assert_eq!(
                        range.width_in_ticks(),
                        2 * i64::from(spacing) * i64::from(width)
                    );
                    assert_eq!(range.lower.rem_euclid(spacing), 0);
                    assert_eq!(range.upper.rem_euclid(spacing), 0);
                    assert!(range.lower <= tick && tick < range.upper);
                }
            }
        }
    }

    #[test]
    fn rejects_non_positive_spacing() {
        assert!(matches!(
            nearest_usable_tick(5, 0),
            Err(ClientError::InvalidPoolState(_))
        ));
        assert!(matches!(
            compute_tick_range(&state(5, -10), 20),
            Err(ClientError::InvalidPoolState(_))
        ));
    }

    #[test]
    fn validates_caller_ranges() {
        assert!(TickRange::new(-120, 120, 60).is_ok());
        assert!(TickRange::new(120, -120, 60).is_err());
        assert!(TickRange::new(-100, 120, 60).is_err());
        let wide = TickRange::new(-887_280, 887_280, 60).expect("aligned");
        assert!(!wide.within_protocol_bounds());
    }
}
