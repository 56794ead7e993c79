use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use starknet::core::types::Felt;
use tokio::sync::watch;
use tracing::debug;

use crate::allowance::AllowanceGate;
use crate::error::ClientError;
use crate::events::{confirm_event, AdapterEvent, LiquidityAdded, LiquidityRemoved};
use crate::protocol::AdapterProtocol;
use crate::sequencer::{Plan, PrimaryCall, SequenceReport, TransactionSequencer, WorkflowStatus};
use crate::ticks::{fetch_pool_tick_state, TickRange, MAX_TICK, MIN_TICK};
use crate::utils::{i32_to_felt, u128_to_u256_felts, Address, TxHash};

/// Adapter-held position, encoded on chain as a `u256`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionId(pub u128);

impl PositionId {
    pub fn to_felts(self) -> [Felt; 2] {
        u128_to_u256_felts(self.0)
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddLiquidityRequest {
    pub token_a: Address,
    pub token_b: Address,
    pub fee: u32,
    pub amount_a: u128,
    pub amount_b: u128,
    pub tick_lower: i32,
    pub tick_upper: i32,
}

impl AddLiquidityRequest {
    /// Checks that do not need the pool; tick alignment is checked once the
    /// pool's spacing is known.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.token_a == Felt::ZERO || self.token_b == Felt::ZERO {
            return Err(ClientError::InvalidInput("token address is zero".to_string()));
        }
        if self.token_a == self.token_b {
            return Err(ClientError::InvalidInput("token a and token b must differ".to_string()));
        }
        if self.amount_a == 0 || self.amount_b == 0 {
            return Err(ClientError::InvalidInput("liquidity amounts must be positive".to_string()));
        }
        if self.tick_lower >= self.tick_upper {
            return Err(ClientError::InvalidInput(format!(
                "tick lower {} must be below tick upper {}",
                self.tick_lower, self.tick_upper
            )));
        }
        if self.tick_lower < MIN_TICK || self.tick_upper > MAX_TICK {
            return Err(ClientError::InvalidInput(format!(
                "ticks {}..{} outside {MIN_TICK}..{MAX_TICK}",
                self.tick_lower, self.tick_upper
            )));
        }
        Ok(())
    }

    /// `(token_a, token_b, fee, amount_a: u256, amount_b: u256, tick_lower, tick_upper)`.
    pub fn to_calldata(&self) -> Result<Vec<Felt>, ClientError> {
        let mut calldata = vec![self.token_a, self.token_b, Felt::from(self.fee)];
        calldata.extend(u128_to_u256_felts(self.amount_a));
        calldata.extend(u128_to_u256_felts(self.amount_b));
        calldata.push(i32_to_felt(self.tick_lower)?);
        calldata.push(i32_to_felt(self.tick_upper)?);
        Ok(calldata)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawRequest {
    pub position_id: PositionId,
    pub liquidity: u128,
    pub min_amount0: u128,
    pub min_amount1: u128,
}

impl WithdrawRequest {
    pub fn to_calldata(&self) -> Vec<Felt> {
        let mut calldata = self.position_id.to_felts().to_vec();
        calldata.push(Felt::from(self.liquidity));
        calldata.extend(u128_to_u256_felts(self.min_amount0));
        calldata.extend(u128_to_u256_felts(self.min_amount1));
        calldata
    }
}

/// `total * numerator / denominator`, floored, without intermediate overflow.
pub fn liquidity_fraction(total: u128, numerator: u128, denominator: u128) -> Result<u128, ClientError> {
    if denominator == 0 || numerator == 0 || numerator > denominator {
        return Err(ClientError::InvalidInput(format!(
            "fraction {numerator}/{denominator} must be in (0, 1]"
        )));
    }
    let whole = (total / denominator) * numerator;
    let rem = (total % denominator)
        .checked_mul(numerator)
        .map(|product| product / denominator)
        .ok_or_else(|| ClientError::InvalidInput("fraction denominator too large".to_string()))?;
    Ok(whole + rem)
}

/// Adds liquidity into new adapter positions and withdraws from existing ones.
pub struct PositionWorkflow<P: AdapterProtocol + ?Sized> {
    protocol: Arc<P>,
    gate: Arc<AllowanceGate>,
    sequencer: TransactionSequencer,
    confirmation_timeout: Duration,
}

impl<P: AdapterProtocol + ?Sized> PositionWorkflow<P> {
    pub fn new(
        protocol: Arc<P>,
        gate: Arc<AllowanceGate>,
        submission_timeout: Duration,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            protocol,
            gate,
            sequencer: TransactionSequencer::new(submission_timeout),
            confirmation_timeout,
        }
    }

    pub fn status(&self) -> WorkflowStatus {
        self.sequencer.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowStatus> {
        self.sequencer.subscribe()
    }

    pub fn sequencer(&self) -> &TransactionSequencer {
        &self.sequencer
    }

    pub async fn add_liquidity(
        &self,
        request: AddLiquidityRequest,
    ) -> Result<SequenceReport, ClientError> {
        let protocol = self.protocol.as_ref();
        let prepare = async move {
            request.validate()?;
            let state =
                fetch_pool_tick_state(protocol, request.token_a, request.token_b, request.fee)
                    .await?;
            let range = TickRange::new(request.tick_lower, request.tick_upper, state.tick_spacing)?;
            debug!(
                pool = %state.pool,
                lower = range.lower,
                upper = range.upper,
                spacing = range.spacing,
                "liquidity range accepted"
            );

            let adapter = protocol.adapter();
            Plan::new(PrimaryCall::AddLiquidity(request.clone()))
                .with_approval(request.token_a, adapter, request.amount_a)?
                .with_approval(request.token_b, adapter, request.amount_b)
        };
        self.sequencer
            .run_prepared(protocol, &self.gate, prepare)
            .await
    }

    /// Checks `request.liquidity` against the position's recorded liquidity
    /// before anything is submitted.
    pub async fn withdraw_liquidity(
        &self,
        request: WithdrawRequest,
    ) -> Result<SequenceReport, ClientError> {
        let protocol = self.protocol.as_ref();
        let prepare = async move {
            if request.liquidity == 0 {
                return Err(ClientError::InvalidInput(
                    "liquidity to withdraw is zero".to_string(),
                ));
            }
            let recorded = protocol.position_liquidity(request.position_id).await?;
            if request.liquidity > recorded {
                return Err(ClientError::InvalidInput(format!(
                    "position {} holds {recorded} liquidity, {} requested",
                    request.position_id, request.liquidity
                )));
            }
            Ok::<_, ClientError>(Plan::new(PrimaryCall::WithdrawLiquidity(request)))
        };
        self.sequencer
            .run_prepared(protocol, &self.gate, prepare)
            .await
    }

    pub async fn position_liquidity(&self, position_id: PositionId) -> Result<u128, ClientError> {
        self.protocol.position_liquidity(position_id).await
    }

    /// New position id and the amounts the pool actually took.
    pub async fn confirm_liquidity_added(&self, tx_hash: TxHash) -> Result<LiquidityAdded, ClientError> {
        confirm_event(
            self.protocol.as_ref(),
            tx_hash,
            self.confirmation_timeout,
            |event| match event {
                AdapterEvent::LiquidityAdded(added) => Some(added),
                _ => None,
            },
        )
        .await
    }

    pub async fn confirm_liquidity_removed(
        &self,
        tx_hash: TxHash,
    ) -> Result<LiquidityRemoved, ClientError> {
        confirm_event(
            self.protocol.as_ref(),
            tx_hash,
            self.confirmation_timeout,
            |event| match event {
                AdapterEvent::LiquidityRemoved(removed) => Some(removed),
                _ => None,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AddLiquidityRequest {
        AddLiquidityRequest {
            token_a: Felt::from(1u8),
            token_b: Felt::from(2u8),
            fee: 3000,
            amount_a: 1_000,
            amount_b: 2_000,
            tick_lower: -1_200,
            tick_upper: 1_200,
        }
    }

    #[test]
    fn validate_rejects_bad_requests() {
        assert!(request().validate().is_ok());

        let mut same = request();
        same.token_b = same.token_a;
        assert!(same.validate().is_err());

        let mut zero = request();
        zero.amount_b = 0;
        assert!(zero.validate().is_err());

        let mut inverted = request();
        inverted.tick_lower = 1_200;
        inverted.tick_upper = -1_200;
        assert!(inverted.validate().is_err());

        let mut wide = request();
        wide.tick_upper = MAX_TICK + 1;
        assert!(wide.validate().is_err());
    }

    #[test]
    fn add_calldata_encodes_negative_ticks() {
        let calldata = request().to_calldata().expect("calldata");
        assert_eq!(calldata.len(), 9);
        assert_eq!(calldata[7], i32_to_felt(-1_200).expect("tick"));
        assert_eq!(calldata[8], Felt::from(1_200u32));
    }

    #[test]
    fn withdraw_calldata_layout() {
        let request = WithdrawRequest {
            position_id: PositionId(7),
            liquidity: 50,
            min_amount0: 1,
            min_amount1: 2,
        };
        let calldata = request.to_calldata();
        assert_eq!(calldata.len(), 7);
        assert_eq!(calldata[0], Felt::from(7u8));
        assert_eq!(calldata[2], Felt::from(50u8));
    }

    #[test]
    fn fraction_of_liquidity() {
        assert_eq!(liquidity_fraction(1_001, 1, 2).expect("half"), 500);
        assert_eq!(liquidity_fraction(1_000, 1, 1).expect("all"), 1_000);
        assert_eq!(liquidity_fraction(u128::MAX, 1, 2).expect("half"), u128::MAX / 2);
        assert!(liquidity_fraction(10, 0, 2).is_err());
        assert!(liquidity_fraction(10, 3, 2).is_err());
    }
}
