use std::env;
use std::sync::Arc;
use std::time::Duration;

use starknet::accounts::{ExecutionEncoding, SingleOwnerAccount};
use starknet::core::types::{BlockId, BlockTag, Felt};
use starknet::providers::jsonrpc::{HttpTransport, JsonRpcClient};
use starknet::providers::Provider;
use starknet::signers::{LocalWallet, SigningKey};
use url::Url;

use v3adapter_client::{
    liquidity_fraction, parse_felt, AdapterClient, AddLiquidityRequest, StarknetAdapter,
    WithdrawRequest, WorkflowConfig, WorkflowStatus,
};

/// Devnet smoke run: add liquidity around the current price, withdraw half of
/// it, then swap. Needs a deployed adapter, factory and funded account.
#[tokio::test]
async fn e2e_flow() -> Result<(), Box<dyn std::error::Error>> {
    if env::var("E2E").ok().as_deref() != Some("1") {
        return Ok(());
    }

    let rpc_url = env::var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:5050".to_string());
    let account_address = required_felt("ACCOUNT_ADDRESS")?;
    let private_key = required_felt("PRIVATE_KEY")?;
    let adapter_address = required_felt("ADAPTER_ADDRESS")?;
    let factory_address = required_felt("FACTORY_ADDRESS")?;
    let token_a = required_felt("TOKEN_A")?;
    let token_b = required_felt("TOKEN_B")?;
    let fee = env::var("POOL_FEE")
        .ok()
        .map(|value| value.parse::<u32>())
        .transpose()?
        .unwrap_or(3000);

    let provider = JsonRpcClient::new(HttpTransport::new(Url::parse(&rpc_url)?));
    let chain_id = provider.chain_id().await?;
    let signer = SigningKey::from_secret_scalar(private_key);
    let mut account = SingleOwnerAccount::new(
        provider,
        LocalWallet::from(signer),
        account_address,
        chain_id,
        ExecutionEncoding::New,
    );
    account.set_block_id(BlockId::Tag(BlockTag::Latest));

    let mut adapter = StarknetAdapter::new(account, adapter_address, factory_address);
    adapter.poll_interval = Duration::from_millis(500);
    let client = AdapterClient::new(Arc::new(adapter), WorkflowConfig::default());

    let (state, range) = client.tick_range(token_a, token_b, fee).await?;
    assert!(range.lower <= state.current_tick && state.current_tick < range.upper);

    let positions = client.position_workflow();
    let added = positions
        .add_liquidity(AddLiquidityRequest {
            token_a,
            token_b,
            fee,
            amount_a: 1_000_000,
            amount_b: 1_000_000_000_000,
            tick_lower: range.lower,
            tick_upper: range.upper,
        })
        .await?;
    assert_eq!(positions.status(), WorkflowStatus::Succeeded);
    let position = positions.confirm_liquidity_added(added.tx_hash).await?;
    assert!(position.position_id.0 > 0);

    let recorded = positions.position_liquidity(position.position_id).await?;
    let half = liquidity_fraction(recorded, 1, 2)?;
    let removed = positions
        .withdraw_liquidity(WithdrawRequest {
            position_id: position.position_id,
            liquidity: half,
            min_amount0: 0,
            min_amount1: 0,
        })
        .await?;
    let withdrawn = positions.confirm_liquidity_removed(removed.tx_hash).await?;
    assert!(withdrawn.amount0 > 0 || withdrawn.amount1 > 0);

    let request = client.prepare_swap(token_a, token_b, fee, 100_000).await?;
    let swaps = client.swap_workflow();
    let report = swaps.swap_exact_input(request.clone()).await?;
    let swapped = swaps.confirm_swap(report.tx_hash).await?;
    assert!(swapped.amount_out >= request.min_amount_out);
    Ok(())
}

fn required_felt(key: &str) -> Result<Felt, Box<dyn std::error::Error>> {
    let value = env::var(key)?;
    Ok(parse_felt(&value)?)
}
