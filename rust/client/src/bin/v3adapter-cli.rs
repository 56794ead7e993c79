use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use starknet::accounts::{ExecutionEncoding, SingleOwnerAccount};
use starknet::core::types::{BlockId, BlockTag, Felt};
use starknet::providers::jsonrpc::{HttpTransport, JsonRpcClient};
use starknet::providers::Provider;
use starknet::signers::{LocalWallet, SigningKey};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use v3adapter_client::{
    config_path, felt_to_hex, liquidity_fraction, load_config, parse_felt, AdapterClient,
    AdapterEvent, AdapterProtocol, AddLiquidityRequest, AppConfig, ApprovalOutcome, PositionId,
    ReadOnlyAccount, SequenceReport, StarknetAdapter, SwapRequest, TokenHandle, WithdrawRequest,
};

const PRIVATE_KEY_ENV: &str = "V3ADAPTER_PRIVATE_KEY";

#[derive(Parser)]
#[command(name = "v3adapter-cli")]
#[command(about = "liquidity and swap workflows against the v3 adapter", long_about = None)]
struct Cli {
    /// Defaults to $V3ADAPTER_CONFIG, then ./config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Usable tick range around the current pool price.
    Ticks {
        #[arg(long)]
        token_a: String,
        #[arg(long)]
        token_b: String,
        #[arg(long)]
        fee: u32,
        #[arg(long)]
        width: Option<u32>,
    },
    Quote {
        #[arg(long)]
        token_in: String,
        #[arg(long)]
        token_out: String,
        #[arg(long)]
        fee: u32,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        slippage_bps: Option<u32>,
    },
    Allowance {
        #[arg(long)]
        token: String,
        #[command(flatten)]
        account: AccountArgs,
    },
    Position {
        #[arg(long)]
        position_id: u128,
    },
    Swap {
        #[arg(long)]
        token_in: String,
        #[arg(long)]
        token_out: String,
        #[arg(long)]
        fee: u32,
        #[arg(long)]
        amount: String,
        /// Explicit output floor; otherwise derived from a fresh quote.
        #[arg(long)]
        min_out: Option<String>,
        #[arg(long)]
        slippage_bps: Option<u32>,
        #[command(flatten)]
        account: AccountArgs,
    },
    AddLiquidity {
        #[arg(long)]
        token_a: String,
        #[arg(long)]
        token_b: String,
        #[arg(long)]
        fee: u32,
        #[arg(long)]
        amount_a: String,
        #[arg(long)]
        amount_b: String,
        #[arg(long, allow_hyphen_values = true, requires = "tick_upper")]
        tick_lower: Option<i32>,
        #[arg(long, allow_hyphen_values = true, requires = "tick_lower")]
        tick_upper: Option<i32>,
        #[command(flatten)]
        account: AccountArgs,
    },
    Withdraw {
        #[arg(long)]
        position_id: u128,
        #[arg(long, conflicts_with = "fraction")]
        liquidity: Option<u128>,
        /// Share of the recorded liquidity, e.g. `1/2`.
        #[arg(long)]
        fraction: Option<String>,
        #[arg(long, default_value_t = 0)]
        min_amount0: u128,
        #[arg(long, default_value_t = 0)]
        min_amount1: u128,
        #[command(flatten)]
        account: AccountArgs,
    },
}

#[derive(Args, Clone, Default)]
struct AccountArgs {
    #[arg(long)]
    account_address: Option<String>,
    /// Falls back to $V3ADAPTER_PRIVATE_KEY.
    #[arg(long)]
    private_key: Option<String>,
}

#[derive(Serialize)]
struct TicksOutput {
    pool: String,
    current_tick: i32,
    tick_spacing: i32,
    tick_lower: i32,
    tick_upper: i32,
}

#[derive(Serialize)]
struct QuoteOutput {
    amount_in: String,
    amount_out: String,
    min_amount_out: String,
    slippage_bps: u32,
}

#[derive(Serialize)]
struct ExecutionOutput {
    tx_hash: String,
    approvals: Vec<ApprovalOutput>,
    event: AdapterEvent,
    pair: String,
}

#[derive(Serialize)]
struct ApprovalOutput {
    token: String,
    amount: String,
    tx_hash: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        error!("{err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let path = config_path(cli.config.clone());
    let mut config = load_config(&path)?;
    info!("loaded config from {}", path.display());

    match cli.command {
        Commands::Ticks {
            token_a,
            token_b,
            fee,
            width,
        } => {
            if let Some(width) = width {
                config.workflow.tick_width = width;
            }
            let token_a = config.token(&token_a)?;
            let token_b = config.token(&token_b)?;
            let client = build_client(&config, &AccountArgs::default(), false).await?;
            let (state, range) = client.tick_range(token_a.address, token_b.address, fee).await?;
            let output = TicksOutput {
                pool: felt_to_hex(state.pool),
                current_tick: state.current_tick,
                tick_spacing: state.tick_spacing,
                tick_lower: range.lower,
                tick_upper: range.upper,
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!(
                    "pool {} tick {} spacing {} => [{}, {}]",
                    output.pool, output.current_tick, output.tick_spacing, output.tick_lower,
                    output.tick_upper
                );
            }
        }
        Commands::Quote {
            token_in,
            token_out,
            fee,
            amount,
            slippage_bps,
        } => {
            if let Some(bps) = slippage_bps {
                config.workflow.slippage_bps = bps;
            }
            let token_in = config.token(&token_in)?;
            let token_out = config.token(&token_out)?;
            let amount_in = token_in.parse_amount(&amount)?;
            let client = build_client(&config, &AccountArgs::default(), false).await?;
            let quote = client
                .quote(token_in.address, token_out.address, fee, amount_in)
                .await?;
            let slippage_bps = client.config().slippage_bps;
            let output = QuoteOutput {
                amount_in: token_in.format_amount(quote.amount_in),
                amount_out: token_out.format_amount(quote.amount_out),
                min_amount_out: token_out.format_amount(quote.min_out(slippage_bps)?),
                slippage_bps,
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!(
                    "{} {} -> {} {} (min {} at {} bps)",
                    output.amount_in,
                    token_in.label(),
                    output.amount_out,
                    token_out.label(),
                    output.min_amount_out,
                    output.slippage_bps
                );
            }
        }
        Commands::Allowance { token, account } => {
            let token = config.token(&token)?;
            let client = build_client(&config, &account, false).await?;
            let amount = client.allowance(token.address).await?;
            if cli.json {
                let output = serde_json::json!({
                    "token": felt_to_hex(token.address),
                    "owner": felt_to_hex(client.protocol().signer()),
                    "spender": felt_to_hex(client.protocol().adapter()),
                    "amount": token.format_amount(amount),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{} {} approved", token.format_amount(amount), token.label());
            }
        }
        Commands::Position { position_id } => {
            let client = build_client(&config, &AccountArgs::default(), false).await?;
            let liquidity = client.position_liquidity(PositionId(position_id)).await?;
            if cli.json {
                let output = serde_json::json!({
                    "position_id": position_id.to_string(),
                    "liquidity": liquidity.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("position {position_id} liquidity {liquidity}");
            }
        }
        Commands::Swap {
            token_in,
            token_out,
            fee,
            amount,
            min_out,
            slippage_bps,
            account,
        } => {
            if let Some(bps) = slippage_bps {
                config.workflow.slippage_bps = bps;
            }
            let token_in = config.token(&token_in)?;
            let token_out = config.token(&token_out)?;
            let amount_in = token_in.parse_amount(&amount)?;
            let client = build_client(&config, &account, true).await?;
            let request = match min_out {
                Some(min_out) => SwapRequest::new(
                    token_in.address,
                    token_out.address,
                    fee,
                    amount_in,
                    token_out.parse_amount(&min_out)?,
                )?,
                None => {
                    client
                        .prepare_swap(token_in.address, token_out.address, fee, amount_in)
                        .await?
                }
            };
            info!(
                min_out = %token_out.format_amount(request.min_amount_out),
                "swapping {} {}",
                token_in.format_amount(amount_in),
                token_in.label()
            );
            let workflow = client.swap_workflow();
            let report = workflow.swap_exact_input(request).await?;
            let swapped = workflow.confirm_swap(report.tx_hash).await?;
            let summary = format!(
                "swapped {} {} for {} {}",
                token_in.format_amount(swapped.amount_in),
                token_in.label(),
                token_out.format_amount(swapped.amount_out),
                token_out.label()
            );
            print_execution(
                cli.json,
                &config,
                &report,
                AdapterEvent::TokensSwapped(swapped),
                &summary,
            )?;
        }
        Commands::AddLiquidity {
            token_a,
            token_b,
            fee,
            amount_a,
            amount_b,
            tick_lower,
            tick_upper,
            account,
        } => {
            let token_a = config.token(&token_a)?;
            let token_b = config.token(&token_b)?;
            let amount_a = token_a.parse_amount(&amount_a)?;
            let amount_b = token_b.parse_amount(&amount_b)?;
            let client = build_client(&config, &account, true).await?;
            let (tick_lower, tick_upper) = match (tick_lower, tick_upper) {
                (Some(lower), Some(upper)) => (lower, upper),
                _ => {
                    let (_, range) = client.tick_range(token_a.address, token_b.address, fee).await?;
                    (range.lower, range.upper)
                }
            };
            let workflow = client.position_workflow();
            let report = workflow
                .add_liquidity(AddLiquidityRequest {
                    token_a: token_a.address,
                    token_b: token_b.address,
                    fee,
                    amount_a,
                    amount_b,
                    tick_lower,
                    tick_upper,
                })
                .await?;
            let added = workflow.confirm_liquidity_added(report.tx_hash).await?;
            let summary = format!(
                "position {} holds {} {} and {} {} in [{}, {}]",
                added.position_id,
                token_a.format_amount(added.amount_a),
                token_a.label(),
                token_b.format_amount(added.amount_b),
                token_b.label(),
                added.tick_lower,
                added.tick_upper
            );
            print_execution(
                cli.json,
                &config,
                &report,
                AdapterEvent::LiquidityAdded(added),
                &summary,
            )?;
        }
        Commands::Withdraw {
            position_id,
            liquidity,
            fraction,
            min_amount0,
            min_amount1,
            account,
        } => {
            let position_id = PositionId(position_id);
            let client = build_client(&config, &account, true).await?;
            let liquidity = match (liquidity, fraction) {
                (Some(liquidity), _) => liquidity,
                (None, Some(fraction)) => {
                    let (numerator, denominator) = parse_fraction(&fraction)?;
                    let recorded = client.position_liquidity(position_id).await?;
                    liquidity_fraction(recorded, numerator, denominator)?
                }
                (None, None) => return Err("either --liquidity or --fraction is required".into()),
            };
            let workflow = client.position_workflow();
            let report = workflow
                .withdraw_liquidity(WithdrawRequest {
                    position_id,
                    liquidity,
                    min_amount0,
                    min_amount1,
                })
                .await?;
            let removed = workflow.confirm_liquidity_removed(report.tx_hash).await?;
            let summary = format!(
                "withdrew {liquidity} liquidity from position {position_id}: amount0 {} amount1 {}",
                removed.amount0, removed.amount1
            );
            print_execution(
                cli.json,
                &config,
                &report,
                AdapterEvent::LiquidityRemoved(removed),
                &summary,
            )?;
        }
    }
    Ok(())
}

async fn build_client(
    config: &AppConfig,
    account: &AccountArgs,
    signing: bool,
) -> Result<AdapterClient<dyn AdapterProtocol>, Box<dyn Error>> {
    let provider = JsonRpcClient::new(HttpTransport::new(config.rpc_url.clone()));
    let chain_id = match config.chain_id {
        Some(chain_id) => chain_id,
        None => provider
            .chain_id()
            .await
            .map_err(|e| format!("failed to fetch chain_id: {e}"))?,
    };
    let account_address = match &account.account_address {
        Some(value) => Some(parse_felt(value)?),
        None => config.account_address,
    };

    let protocol: Arc<dyn AdapterProtocol> = if signing {
        let address = account_address.ok_or("account_address is required to sign")?;
        let private_key = match &account.private_key {
            Some(value) => value.clone(),
            None => std::env::var(PRIVATE_KEY_ENV)
                .map_err(|_| format!("--private-key or {PRIVATE_KEY_ENV} is required to sign"))?,
        };
        let signing_key = SigningKey::from_secret_scalar(parse_felt(&private_key)?);
        let mut signer = SingleOwnerAccount::new(
            provider,
            LocalWallet::from(signing_key),
            address,
            chain_id,
            ExecutionEncoding::New,
        );
        signer.set_block_id(BlockId::Tag(BlockTag::Latest));
        Arc::new(adapter_for(config, signer))
    } else {
        let reader = ReadOnlyAccount::new(provider, account_address.unwrap_or(Felt::ZERO), chain_id);
        Arc::new(adapter_for(config, reader))
    };
    Ok(AdapterClient::new(protocol, config.workflow.clone()))
}

fn adapter_for<A>(config: &AppConfig, account: A) -> StarknetAdapter<A>
where
    A: starknet::accounts::ConnectedAccount + Sync + Send,
{
    let mut adapter = StarknetAdapter::new(account, config.adapter_address, config.factory_address);
    adapter.retry = config.retry.clone();
    adapter.poll_interval = config.poll_interval;
    adapter
}

fn parse_fraction(value: &str) -> Result<(u128, u128), Box<dyn Error>> {
    let (numerator, denominator) = value
        .split_once('/')
        .ok_or_else(|| format!("fraction {value} must look like 1/2"))?;
    Ok((numerator.trim().parse()?, denominator.trim().parse()?))
}

fn print_execution(
    json: bool,
    config: &AppConfig,
    report: &SequenceReport,
    event: AdapterEvent,
    summary: &str,
) -> Result<(), Box<dyn Error>> {
    let approvals = report
        .approvals
        .iter()
        .map(|record| {
            let amount = config
                .tokens
                .iter()
                .find(|token| token.address == record.step.token)
                .map(|token: &TokenHandle| token.format_amount(record.step.amount))
                .unwrap_or_else(|| record.step.amount.to_string());
            ApprovalOutput {
                token: felt_to_hex(record.step.token),
                amount,
                tx_hash: match record.outcome {
                    ApprovalOutcome::Approved { tx_hash } => Some(felt_to_hex(tx_hash)),
                    ApprovalOutcome::Sufficient => None,
                },
            }
        })
        .collect::<Vec<_>>();
    let output = ExecutionOutput {
        tx_hash: felt_to_hex(report.tx_hash),
        pair: event.pair_key().to_string(),
        approvals,
        event,
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }
    for approval in &output.approvals {
        match &approval.tx_hash {
            Some(tx_hash) => println!("approved {} of {} in {tx_hash}", approval.amount, approval.token),
            None => println!("allowance for {} already sufficient", approval.token),
        }
    }
    println!("{summary}");
    println!("tx {}", output.tx_hash);
    Ok(())
}
