//! `AdapterProtocol` over a Starknet account.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use starknet::accounts::{Account, AccountError, ConnectedAccount};
use starknet::core::types::{
    BlockId, BlockTag, Call, ExecutionResult, Felt, FunctionCall, StarknetError,
    TransactionFinalityStatus,
};
use starknet::core::utils::get_selector_from_name;
use starknet::providers::{Provider, ProviderError};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::events::{decode_receipt_events, AdapterEvent};
use crate::liquidity::{AddLiquidityRequest, PositionId, WithdrawRequest};
use crate::protocol::AdapterProtocol;
use crate::swap::SwapRequest;
use crate::utils::{
    felt_to_hex, felt_to_i32, felt_to_u128, u128_to_u256_felts, u256_felts_to_u128,
    u256_felts_to_u128_saturating, Address, TxHash,
};

const GET_POOL: &str = "get_pool";
const SLOT0: &str = "slot0";
const TICK_SPACING: &str = "tick_spacing";
const ALLOWANCE: &str = "allowance";
const APPROVE: &str = "approve";
const GET_QUOTE: &str = "get_quote";
const DEPOSITS: &str = "deposits";
const SWAP_EXACT_INPUT: &str = "swap_exact_input";
const ADD_LIQUIDITY: &str = "add_liquidity";
const WITHDRAW_LIQUIDITY: &str = "withdraw_liquidity";

const L2_GAS_ENV: &str = "V3ADAPTER_L2_GAS";
const L2_GAS_PRICE_ENV: &str = "V3ADAPTER_L2_GAS_PRICE";

/// Transport retry for read calls. Submissions are never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 500,
        }
    }
}

pub(crate) async fn with_retry<F, Fut, T>(retry: &RetryConfig, mut f: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0usize;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= retry.max_attempts {
                    return Err(err);
                }
                debug!(attempt, error = %err, "retrying read");
                sleep(Duration::from_millis(retry.delay_ms)).await;
            }
        }
    }
}

pub struct StarknetAdapter<A: ConnectedAccount + Sync + Send> {
    account: Arc<A>,
    adapter_address: Address,
    factory_address: Address,
    pub retry: RetryConfig,
    pub poll_interval: Duration,
}

impl<A: ConnectedAccount + Sync + Send> StarknetAdapter<A> {
    pub fn new(account: A, adapter_address: Address, factory_address: Address) -> Self {
        Self {
            account: Arc::new(account),
            adapter_address,
            factory_address,
            retry: RetryConfig::default(),
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn account(&self) -> &A {
        &self.account
    }

    async fn read(
        &self,
        contract_address: Address,
        entry_point: &str,
        calldata: Vec<Felt>,
    ) -> Result<Vec<Felt>, ClientError> {
        let call = FunctionCall {
            contract_address,
            entry_point_selector: selector(entry_point)?,
            calldata,
        };
        let provider = self.account.provider();
        with_retry(&self.retry, || async {
            provider
                .call(call.clone(), BlockId::Tag(BlockTag::Latest))
                .await
                .map_err(|err| ClientError::Rpc(format!("{entry_point}: {err}")))
        })
        .await
    }

    async fn execute(
        &self,
        to: Address,
        entry_point: &str,
        calldata: Vec<Felt>,
    ) -> Result<TxHash, ClientError> {
        let call = Call {
            to,
            selector: selector(entry_point)?,
            calldata,
        };
        let mut exec = self.account.execute_v3(vec![call]);
        if let Ok(l2_gas) = std::env::var(L2_GAS_ENV) {
            let parsed = l2_gas
                .parse::<u64>()
                .map_err(|_| ClientError::InvalidInput(format!("invalid {L2_GAS_ENV}")))?;
            exec = exec.l2_gas(parsed);
        }
        if let Ok(l2_gas_price) = std::env::var(L2_GAS_PRICE_ENV) {
            let parsed = l2_gas_price
                .parse::<u128>()
                .map_err(|_| ClientError::InvalidInput(format!("invalid {L2_GAS_PRICE_ENV}")))?;
            exec = exec.l2_gas_price(parsed);
        }
        let result = exec.send().await.map_err(classify_account_error)?;
        debug!(
            entry_point,
            tx_hash = %felt_to_hex(result.transaction_hash),
            "transaction accepted"
        );
        Ok(result.transaction_hash)
    }
}

#[async_trait]
impl<A: ConnectedAccount + Sync + Send> AdapterProtocol for StarknetAdapter<A> {
    fn signer(&self) -> Address {
        self.account.address()
    }

    fn adapter(&self) -> Address {
        self.adapter_address
    }

    async fn get_pool(
        &self,
        token_a: Address,
        token_b: Address,
        fee: u32,
    ) -> Result<Address, ClientError> {
        let result = self
            .read(self.factory_address, GET_POOL, vec![token_a, token_b, Felt::from(fee)])
            .await?;
        result
            .first()
            .copied()
            .ok_or_else(|| ClientError::Rpc("empty get_pool result".to_string()))
    }

    async fn current_tick(&self, pool: Address) -> Result<i32, ClientError> {
        // (sqrt_price: u256, tick: i32, ...)
        let result = self.read(pool, SLOT0, Vec::new()).await?;
        if result.len() < 3 {
            return Err(ClientError::InvalidPoolState("short slot0 result".to_string()));
        }
        felt_to_i32(&result[2]).map_err(|err| ClientError::InvalidPoolState(err.to_string()))
    }

    async fn tick_spacing(&self, pool: Address) -> Result<i32, ClientError> {
        let result = self.read(pool, TICK_SPACING, Vec::new()).await?;
        let spacing = result
            .first()
            .ok_or_else(|| ClientError::InvalidPoolState("empty tick_spacing result".to_string()))?;
        felt_to_i32(spacing).map_err(|err| ClientError::InvalidPoolState(err.to_string()))
    }

    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<u128, ClientError> {
        let result = self.read(token, ALLOWANCE, vec![owner, spender]).await?;
        if result.len() < 2 {
            return Err(ClientError::Rpc("short allowance result".to_string()));
        }
        u256_felts_to_u128_saturating(&result[0], &result[1])
    }

    async fn get_quote(
        &self,
        token_in: Address,
        token_out: Address,
        fee: u32,
        amount_in: u128,
    ) -> Result<u128, ClientError> {
        let mut calldata = vec![token_in, token_out, Felt::from(fee)];
        calldata.extend(u128_to_u256_felts(amount_in));
        let result = self.read(self.adapter_address, GET_QUOTE, calldata).await?;
        if result.len() < 2 {
            return Err(ClientError::Rpc("short get_quote result".to_string()));
        }
        u256_felts_to_u128(&result[0], &result[1])
    }

    async fn position_liquidity(&self, position_id: PositionId) -> Result<u128, ClientError> {
        // (owner, liquidity, token0, token1)
        let result = self
            .read(self.adapter_address, DEPOSITS, position_id.to_felts().to_vec())
            .await?;
        if result.len() < 2 {
            return Err(ClientError::Rpc("short deposits result".to_string()));
        }
        if result[0] == Felt::ZERO {
            return Err(ClientError::InvalidInput(format!("position {position_id} not found")));
        }
        felt_to_u128(&result[1])
    }

    async fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: u128,
    ) -> Result<TxHash, ClientError> {
        let mut calldata = vec![spender];
        calldata.extend(u128_to_u256_felts(amount));
        self.execute(token, APPROVE, calldata).await
    }

    async fn swap_exact_input(&self, request: &SwapRequest) -> Result<TxHash, ClientError> {
        self.execute(self.adapter_address, SWAP_EXACT_INPUT, request.to_calldata())
            .await
    }

    async fn add_liquidity(&self, request: &AddLiquidityRequest) -> Result<TxHash, ClientError> {
        self.execute(self.adapter_address, ADD_LIQUIDITY, request.to_calldata()?)
            .await
    }

    async fn withdraw_liquidity(&self, request: &WithdrawRequest) -> Result<TxHash, ClientError> {
        self.execute(self.adapter_address, WITHDRAW_LIQUIDITY, request.to_calldata())
            .await
    }

    async fn wait_for_finality(&self, tx_hash: TxHash) -> Result<Vec<AdapterEvent>, ClientError> {
        let provider = self.account.provider();
        let mut failures = 0usize;
        loop {
            match provider.get_transaction_receipt(tx_hash).await {
                Ok(found) => {
                    let receipt = found.receipt;
                    if let ExecutionResult::Reverted { reason } = receipt.execution_result() {
                        return Err(ClientError::ExecutionReverted(reason.clone()));
                    }
                    if matches!(
                        receipt.finality_status(),
                        TransactionFinalityStatus::AcceptedOnL2
                            | TransactionFinalityStatus::AcceptedOnL1
                    ) {
                        return Ok(decode_receipt_events(&receipt, self.adapter_address));
                    }
                }
                Err(ProviderError::StarknetError(StarknetError::TransactionHashNotFound)) => {}
                Err(err) => {
                    failures += 1;
                    if failures >= self.retry.max_attempts {
                        return Err(ClientError::Rpc(err.to_string()));
                    }
                    warn!(tx_hash = %felt_to_hex(tx_hash), error = %err, "receipt poll failed");
                }
            }
            sleep(self.poll_interval).await;
        }
    }
}

fn selector(name: &str) -> Result<Felt, ClientError> {
    get_selector_from_name(name).map_err(|err| ClientError::InvalidInput(err.to_string()))
}

fn classify_account_error<S: std::error::Error>(err: AccountError<S>) -> ClientError {
    match err {
        AccountError::Signing(err) => ClientError::ExecutionRejected(err.to_string()),
        AccountError::Provider(err) => classify_provider_error(err),
        other => ClientError::Rpc(other.to_string()),
    }
}

/// Maps submission failures: simulation reverts and validation rejections
/// are not transport errors.
fn classify_provider_error(err: ProviderError) -> ClientError {
    match err {
        ProviderError::StarknetError(StarknetError::TransactionExecutionError(data)) => {
            ClientError::ExecutionReverted(format!("{data:?}"))
        }
        ProviderError::StarknetError(StarknetError::ValidationFailure(reason)) => {
            ClientError::ExecutionRejected(reason)
        }
        other => ClientError::Rpc(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn with_retry_stops_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let retry = RetryConfig {
            max_attempts: 3,
            delay_ms: 1,
        };
        let result: Result<(), ClientError> = with_retry(&retry, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::Rpc("down".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retry_returns_first_success() {
        let calls = AtomicUsize::new(0);
        let value = with_retry(&RetryConfig::default(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ClientError::Rpc("blip".to_string()))
            } else {
                Ok(7u8)
            }
        })
        .await
        .expect("retried");
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn provider_errors_are_classified() {
        assert!(matches!(
            classify_provider_error(ProviderError::StarknetError(
                StarknetError::ValidationFailure("bad sig".to_string())
            )),
            ClientError::ExecutionRejected(_)
        ));
        assert!(matches!(
            classify_provider_error(ProviderError::RateLimited),
            ClientError::Rpc(_)
        ));
    }
}
