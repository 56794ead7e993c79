use std::sync::Arc;
use std::time::Duration;

use crate::allowance::{AllowanceGate, AllowanceKey};
use crate::error::ClientError;
use crate::liquidity::{PositionId, PositionWorkflow};
use crate::protocol::AdapterProtocol;
use crate::quote::{Quote, QuoteEstimator, DEFAULT_SLIPPAGE_BPS};
use crate::swap::{SwapRequest, SwapWorkflow};
use crate::ticks::{resolve_tick_range, PoolTickState, TickRange, DEFAULT_TICK_WIDTH};
use crate::utils::Address;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub slippage_bps: u32,
    pub tick_width: u32,
    pub quote_max_age: Duration,
    pub confirmation_timeout: Duration,
    pub submission_timeout: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            slippage_bps: DEFAULT_SLIPPAGE_BPS,
            tick_width: DEFAULT_TICK_WIDTH,
            quote_max_age: Duration::from_secs(30),
            confirmation_timeout: Duration::from_secs(300),
            submission_timeout: Duration::from_secs(60),
        }
    }
}

/// Entry point for the workflows. The allowance gate and the quote cache are
/// shared by every workflow handed out here; each workflow has its own status.
pub struct AdapterClient<P: AdapterProtocol + ?Sized> {
    protocol: Arc<P>,
    gate: Arc<AllowanceGate>,
    quotes: QuoteEstimator,
    config: WorkflowConfig,
}

impl<P: AdapterProtocol + ?Sized> AdapterClient<P> {
    pub fn new(protocol: Arc<P>, config: WorkflowConfig) -> Self {
        Self {
            gate: Arc::new(AllowanceGate::new(config.confirmation_timeout)),
            quotes: QuoteEstimator::new(config.quote_max_age),
            protocol,
            config,
        }
    }

    pub fn protocol(&self) -> &Arc<P> {
        &self.protocol
    }

    pub fn gate(&self) -> &Arc<AllowanceGate> {
        &self.gate
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub async fn tick_range(
        &self,
        token_a: Address,
        token_b: Address,
        fee: u32,
    ) -> Result<(PoolTickState, TickRange), ClientError> {
        resolve_tick_range(
            self.protocol.as_ref(),
            token_a,
            token_b,
            fee,
            self.config.tick_width,
        )
        .await
    }

    pub async fn quote(
        &self,
        token_in: Address,
        token_out: Address,
        fee: u32,
        amount_in: u128,
    ) -> Result<Quote, ClientError> {
        self.quotes
            .quote(self.protocol.as_ref(), token_in, token_out, fee, amount_in)
            .await
    }

    /// Quotes and turns the quote into a request floored by the configured slippage.
    pub async fn prepare_swap(
        &self,
        token_in: Address,
        token_out: Address,
        fee: u32,
        amount_in: u128,
    ) -> Result<SwapRequest, ClientError> {
        let quote = self.quote(token_in, token_out, fee, amount_in).await?;
        SwapRequest::from_quote(quote, self.config.slippage_bps, self.config.quote_max_age)
    }

    /// Signer's allowance toward the adapter, served from the gate's cache when fresh.
    pub async fn allowance(&self, token: Address) -> Result<u128, ClientError> {
        let key = AllowanceKey {
            owner: self.protocol.signer(),
            token,
            spender: self.protocol.adapter(),
        };
        self.gate.current(self.protocol.as_ref(), &key).await
    }

    pub async fn position_liquidity(&self, position_id: PositionId) -> Result<u128, ClientError> {
        self.protocol.position_liquidity(position_id).await
    }

    pub fn swap_workflow(&self) -> SwapWorkflow<P> {
        SwapWorkflow::new(
            self.protocol.clone(),
            self.gate.clone(),
            self.config.submission_timeout,
            self.config.confirmation_timeout,
        )
    }

    pub fn position_workflow(&self) -> PositionWorkflow<P> {
        PositionWorkflow::new(
            self.protocol.clone(),
            self.gate.clone(),
            self.config.submission_timeout,
            self.config.confirmation_timeout,
        )
    }
}
