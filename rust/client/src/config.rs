use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use starknet::core::types::Felt;
use url::Url;

use crate::adapter::RetryConfig;
use crate::client::WorkflowConfig;
use crate::error::ClientError;
use crate::quote::{DEFAULT_SLIPPAGE_BPS, SLIPPAGE_DENOMINATOR};
use crate::ticks::DEFAULT_TICK_WIDTH;
use crate::token::TokenHandle;
use crate::utils::{parse_felt, Address};

pub const CONFIG_ENV: &str = "V3ADAPTER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub rpc_url: String,
    pub chain_id: Option<String>,
    pub account_address: Option<String>,
    pub adapter_address: String,
    pub factory_address: String,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
    #[serde(default = "default_tick_width")]
    pub tick_width: u32,
    #[serde(default = "default_quote_max_age_secs")]
    pub quote_max_age_secs: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_submission_timeout_secs")]
    pub submission_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub retry: Option<RawRetry>,
    #[serde(default)]
    pub tokens: Vec<RawToken>,
}

#[derive(Debug, Deserialize)]
pub struct RawRetry {
    pub max_attempts: usize,
    pub delay_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct RawToken {
    pub symbol: String,
    pub address: String,
    pub decimals: u8,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rpc_url: Url,
    pub chain_id: Option<Felt>,
    pub account_address: Option<Address>,
    pub adapter_address: Address,
    pub factory_address: Address,
    pub workflow: WorkflowConfig,
    pub poll_interval: Duration,
    pub retry: RetryConfig,
    pub tokens: Vec<TokenHandle>,
}

impl AppConfig {
    /// Looks a token up by symbol (case-insensitive) or by address.
    pub fn token(&self, symbol_or_address: &str) -> Result<TokenHandle, ClientError> {
        if let Some(token) = self.tokens.iter().find(|token| {
            token
                .symbol
                .as_deref()
                .is_some_and(|symbol| symbol.eq_ignore_ascii_case(symbol_or_address))
        }) {
            return Ok(token.clone());
        }
        let address = parse_felt(symbol_or_address).map_err(|_| {
            ClientError::Config(format!("unknown token {symbol_or_address}"))
        })?;
        self.tokens
            .iter()
            .find(|token| token.address == address)
            .cloned()
            .ok_or_else(|| ClientError::Config(format!("token {symbol_or_address} not configured")))
    }
}

fn default_slippage_bps() -> u32 {
    DEFAULT_SLIPPAGE_BPS
}

fn default_tick_width() -> u32 {
    DEFAULT_TICK_WIDTH
}

fn default_quote_max_age_secs() -> u64 {
    30
}

fn default_confirmation_timeout_secs() -> u64 {
    300
}

fn default_submission_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn config_field(name: &str) -> impl Fn(ClientError) -> ClientError + '_ {
    move |err| ClientError::Config(format!("{name}: {err}"))
}

/// `explicit`, else `$V3ADAPTER_CONFIG`, else `config.toml`.
pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

pub fn load_config(path: &Path) -> Result<AppConfig, ClientError> {
    let contents = fs::read_to_string(path)
        .map_err(|err| ClientError::Config(format!("{}: {err}", path.display())))?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<AppConfig, ClientError> {
    let raw: RawConfig = toml::from_str(contents)?;
    finalize_config(raw)
}

pub fn finalize_config(raw: RawConfig) -> Result<AppConfig, ClientError> {
    let rpc_url = Url::parse(&raw.rpc_url).map_err(|e| ClientError::Config(format!("rpc_url: {e}")))?;
    let chain_id = raw
        .chain_id
        .as_deref()
        .map(parse_felt)
        .transpose()
        .map_err(config_field("chain_id"))?;
    let account_address = raw
        .account_address
        .as_deref()
        .map(parse_felt)
        .transpose()
        .map_err(config_field("account_address"))?;
    let adapter_address = parse_felt(&raw.adapter_address).map_err(config_field("adapter_address"))?;
    let factory_address = parse_felt(&raw.factory_address).map_err(config_field("factory_address"))?;

    if adapter_address == Felt::ZERO {
        return Err(ClientError::Config("adapter_address cannot be zero".to_string()));
    }
    if factory_address == Felt::ZERO {
        return Err(ClientError::Config("factory_address cannot be zero".to_string()));
    }
    if account_address == Some(Felt::ZERO) {
        return Err(ClientError::Config("account_address cannot be zero".to_string()));
    }
    if u128::from(raw.slippage_bps) > SLIPPAGE_DENOMINATOR {
        return Err(ClientError::Config(format!(
            "slippage_bps must be <= {SLIPPAGE_DENOMINATOR}"
        )));
    }
    if raw.tick_width == 0 {
        return Err(ClientError::Config("tick_width must be >= 1".to_string()));
    }
    if raw.quote_max_age_secs == 0 {
        return Err(ClientError::Config("quote_max_age_secs must be >= 1".to_string()));
    }
    if raw.confirmation_timeout_secs == 0 {
        return Err(ClientError::Config("confirmation_timeout_secs must be >= 1".to_string()));
    }
    if raw.submission_timeout_secs == 0 {
        return Err(ClientError::Config("submission_timeout_secs must be >= 1".to_string()));
    }
    if raw.poll_interval_ms == 0 {
        return Err(ClientError::Config("poll_interval_ms must be >= 1".to_string()));
    }

    let retry = match raw.retry {
        Some(retry) => {
            if retry.max_attempts == 0 {
                return Err(ClientError::Config("retry.max_attempts must be >= 1".to_string()));
            }
            RetryConfig {
                max_attempts: retry.max_attempts,
                delay_ms: retry.delay_ms,
            }
        }
        None => RetryConfig::default(),
    };

    let mut symbols = HashSet::new();
    let mut addresses = HashSet::new();
    let mut tokens = Vec::with_capacity(raw.tokens.len());
    for token in raw.tokens {
        let symbol = token.symbol.trim().to_string();
        if symbol.is_empty() {
            return Err(ClientError::Config("token symbol cannot be empty".to_string()));
        }
        if !symbols.insert(symbol.to_ascii_uppercase()) {
            return Err(ClientError::Config(format!("duplicate token symbol {symbol}")));
        }
        let address = parse_felt(&token.address).map_err(config_field(&symbol))?;
        if address == Felt::ZERO {
            return Err(ClientError::Config(format!("token {symbol} address cannot be zero")));
        }
        if !addresses.insert(address) {
            return Err(ClientError::Config(format!("duplicate token address for {symbol}")));
        }
        let handle = TokenHandle::new(address, token.decimals).map_err(config_field(&symbol))?;
        tokens.push(handle.with_symbol(symbol));
    }

    Ok(AppConfig {
        rpc_url,
        chain_id,
        account_address,
        adapter_address,
        factory_address,
        workflow: WorkflowConfig {
            slippage_bps: raw.slippage_bps,
            tick_width: raw.tick_width,
            quote_max_age: Duration::from_secs(raw.quote_max_age_secs),
            confirmation_timeout: Duration::from_secs(raw.confirmation_timeout_secs),
            submission_timeout: Duration::from_secs(raw.submission_timeout_secs),
        },
        poll_interval: Duration::from_millis(raw.poll_interval_ms),
        retry,
        tokens,
    })
}
