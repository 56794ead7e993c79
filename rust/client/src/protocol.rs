use async_trait::async_trait;

use crate::error::ClientError;
use crate::events::AdapterEvent;
use crate::liquidity::{AddLiquidityRequest, PositionId, WithdrawRequest};
use crate::swap::SwapRequest;
use crate::utils::{Address, TxHash};

/// The ledger as seen by the workflows: a pool factory, pools, ERC20 tokens and
/// the adapter contract, plus the signing account that submits transactions.
///
/// Mutating calls resolve once the signer's submission is accepted, not at
/// finality. `wait_for_finality` is the only call that waits for commitment.
#[async_trait]
pub trait AdapterProtocol: Send + Sync {
    /// Account that signs approvals and primary calls.
    fn signer(&self) -> Address;

    /// Adapter contract; the spender for every approval.
    fn adapter(&self) -> Address;

    /// Pool for the pair and fee, or zero when none exists.
    async fn get_pool(&self, token_a: Address, token_b: Address, fee: u32)
        -> Result<Address, ClientError>;

    async fn current_tick(&self, pool: Address) -> Result<i32, ClientError>;

    async fn tick_spacing(&self, pool: Address) -> Result<i32, ClientError>;

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<u128, ClientError>;

    async fn get_quote(
        &self,
        token_in: Address,
        token_out: Address,
        fee: u32,
        amount_in: u128,
    ) -> Result<u128, ClientError>;

    /// Liquidity currently recorded for a position held by the adapter.
    async fn position_liquidity(&self, position_id: PositionId) -> Result<u128, ClientError>;

    async fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: u128,
    ) -> Result<TxHash, ClientError>;

    async fn swap_exact_input(&self, request: &SwapRequest) -> Result<TxHash, ClientError>;

    async fn add_liquidity(&self, request: &AddLiquidityRequest) -> Result<TxHash, ClientError>;

    async fn withdraw_liquidity(&self, request: &WithdrawRequest) -> Result<TxHash, ClientError>;

    /// Waits until `tx_hash` is committed and returns the adapter events it
    /// emitted. A reverted transaction is `ExecutionReverted`.
    async fn wait_for_finality(&self, tx_hash: TxHash) -> Result<Vec<AdapterEvent>, ClientError>;
}
