//! Read-only quotes and slippage floors.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::ClientError;
use crate::protocol::AdapterProtocol;
use crate::utils::Address;

/// 500 / 100_000 = 0.5%.
pub const DEFAULT_SLIPPAGE_BPS: u32 = 500;
/// Slippage is expressed in hundredths of a basis point.
pub const SLIPPAGE_DENOMINATOR: u128 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub token_in: Address,
    pub token_out: Address,
    pub fee: u32,
    pub amount_in: u128,
    pub amount_out: u128,
    pub retrieved_at: Instant,
}

impl Quote {
    pub fn age(&self) -> Duration {
        self.retrieved_at.elapsed()
    }

    pub fn ensure_fresh(&self, max_age: Duration) -> Result<(), ClientError> {
        let age = self.age();
        if age > max_age {
            return Err(ClientError::QuoteUnavailable(format!(
                "quote is {}ms old, budget is {}ms",
                age.as_millis(),
                max_age.as_millis()
            )));
        }
        Ok(())
    }

    pub fn min_out(&self, slippage_bps: u32) -> Result<u128, ClientError> {
        min_acceptable_out(self.amount_out, slippage_bps)
    }
}

/// `quote - floor(quote * slippage_bps / 100_000)`.
///
/// Split on the denominator so the product never overflows `u128`; the result
/// equals the single-division floor exactly.
pub fn min_acceptable_out(quote: u128, slippage_bps: u32) -> Result<u128, ClientError> {
    let bps = u128::from(slippage_bps);
    if bps > SLIPPAGE_DENOMINATOR {
        return Err(ClientError::InvalidInput(format!(
            "slippage {slippage_bps} exceeds {SLIPPAGE_DENOMINATOR}"
        )));
    }
    let whole = (quote / SLIPPAGE_DENOMINATOR) * bps;
    let rem = (quote % SLIPPAGE_DENOMINATOR) * bps / SLIPPAGE_DENOMINATOR;
    Ok(quote - (whole + rem))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct QuoteKey {
    token_in: Address,
    token_out: Address,
    fee: u32,
    amount_in: u128,
}

/// Read-through quote lookup. The cache only remembers the most recent
/// successful read per request shape.
#[derive(Debug)]
pub struct QuoteEstimator {
    max_age: Duration,
    cache: Mutex<HashMap<QuoteKey, Quote>>,
}

impl QuoteEstimator {
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub async fn quote<P>(
        &self,
        protocol: &P,
        token_in: Address,
        token_out: Address,
        fee: u32,
        amount_in: u128,
    ) -> Result<Quote, ClientError>
    where
        P: AdapterProtocol + ?Sized,
    {
        if amount_in == 0 {
            return Err(ClientError::InvalidInput("amount in is zero".to_string()));
        }
        if token_in == token_out {
            return Err(ClientError::InvalidInput(
                "token in and token out must differ".to_string(),
            ));
        }
        let key = QuoteKey {
            token_in,
            token_out,
            fee,
            amount_in,
        };
        if let Some(cached) = self.cached(&key) {
            return Ok(cached);
        }

        let amount_out = protocol
            .get_quote(token_in, token_out, fee, amount_in)
            .await
            .map_err(|err| ClientError::QuoteUnavailable(err.to_string()))?;
        if amount_out == 0 {
            return Err(ClientError::QuoteUnavailable("quote returned zero".to_string()));
        }
        let quote = Quote {
            token_in,
            token_out,
            fee,
            amount_in,
            amount_out,
            retrieved_at: Instant::now(),
        };
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, quote.clone());
        }
        tracing::debug!(amount_in, amount_out, fee, "quote refreshed");
        Ok(quote)
    }

    fn cached(&self, key: &QuoteKey) -> Option<Quote> {
        let cache = self.cache.lock().ok()?;
        cache
            .get(key)
            .filter(|quote| quote.age() <= self.max_age)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_percent_floor() {
        assert_eq!(min_acceptable_out(1_000_000, 500).expect("min out"), 995_000);
        assert_eq!(min_acceptable_out(1_000_000, 0).expect("min out"), 1_000_000);
        assert_eq!(min_acceptable_out(1_000_000, 100_000).expect("min out"), 0);
    }

    #[test]
    fn floor_never_rounds_up() {
        // 199 * 500 / 100_000 = 0.995, floored to 0: the floor stays at the quote.
        assert_eq!(min_acceptable_out(199, 500).expect("min out"), 199);
        assert_eq!(min_acceptable_out(201, 500).expect("min out"), 200);
    }

    #[test]
    fn matches_naive_formula_where_it_fits() {
        for quote in [1u128, 7, 99_999, 100_000, 123_456_789, 10u128.pow(30)] {
            for bps in [1u32, 30, 500, 9_999, 100_000] {
                let naive = quote - quote * u128::from(bps) / SLIPPAGE_DENOMINATOR;
                assert_eq!(min_acceptable_out(quote, bps).expect("min out"), naive);
            }
        }
    }

    #[test]
    fn huge_quote_does_not_overflow() {
        let out = min_acceptable_out(u128::MAX, 500).expect("min out");
        assert!(out < u128::MAX);
        assert!(out > u128::MAX / 100 * 99);
    }

    #[test]
    fn rejects_slippage_above_denominator() {
        assert!(matches!(
            min_acceptable_out(1_000, 100_001),
            Err(ClientError::InvalidInput(_))
        ));
    }

    #[test]
    fn stale_quote_is_unavailable() {
        let quote = Quote {
            token_in: 1u8.into(),
            token_out: 2u8.into(),
            fee: 3000,
            amount_in: 10,
            amount_out: 20,
            retrieved_at: Instant::now()
                .checked_sub(Duration::from_secs(120))
                .expect("instant"),
        };
        assert!(matches!(
            quote.ensure_fresh(Duration::from_secs(30)),
            Err(ClientError::QuoteUnavailable(_))
        ));
        assert!(quote.ensure_fresh(Duration::from_secs(600)).is_ok());
    }
}
