//! Client for a concentrated-liquidity adapter on Starknet.

mod adapter;
mod allowance;
mod client;
mod config;
mod error;
mod events;
mod liquidity;
mod protocol;
mod quote;
mod readonly;
mod sequencer;
mod swap;
mod ticks;
mod token;
mod utils;

pub use adapter::{RetryConfig, StarknetAdapter};
pub use allowance::{AllowanceGate, AllowanceKey, AllowanceState, ApprovalOutcome};
pub use client::{AdapterClient, WorkflowConfig};
pub use config::{
    config_path, finalize_config, load_config, parse_config, AppConfig, RawConfig, CONFIG_ENV,
};
pub use error::ClientError;
pub use events::{
    decode_receipt_events, AdapterEvent, LiquidityAdded, LiquidityRemoved, PairKey, TokensSwapped,
};
pub use liquidity::{
    liquidity_fraction, AddLiquidityRequest, PositionId, PositionWorkflow, WithdrawRequest,
};
pub use protocol::AdapterProtocol;
pub use quote::{
    min_acceptable_out, Quote, QuoteEstimator, DEFAULT_SLIPPAGE_BPS, SLIPPAGE_DENOMINATOR,
};
pub use readonly::{ReadOnlyAccount, ReadOnlySignError};
pub use sequencer::{
    ApprovalRecord, ApprovalStep, Plan, PrimaryCall, SequenceReport, TransactionSequencer,
    WorkflowStatus,
};
pub use swap::{SwapRequest, SwapWorkflow};
pub use ticks::{
    compute_tick_range, fetch_pool_tick_state, nearest_usable_tick, resolve_tick_range,
    PoolTickState, TickRange, DEFAULT_TICK_WIDTH, MAX_TICK, MIN_TICK,
};
pub use token::{format_units, parse_units, TokenHandle};
pub use utils::{
    felt_to_hex, felt_to_padded_hex, i32_to_felt, parse_event, parse_felt, Address,
    StarknetEvent, TxHash,
};
