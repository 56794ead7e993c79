use crate::utils::{felt_to_hex, Address};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid pool state: {0}")]
    InvalidPoolState(String),
    #[error("pool not found for {} / {} fee {fee}", felt_to_hex(*token_a), felt_to_hex(*token_b))]
    PoolNotFound {
        token_a: Address,
        token_b: Address,
        fee: u32,
    },
    #[error("approval failed for token {}: {reason}", felt_to_hex(*token))]
    ApprovalFailed { token: Address, reason: String },
    #[error("quote unavailable: {0}")]
    QuoteUnavailable(String),
    #[error("execution rejected by signer: {0}")]
    ExecutionRejected(String),
    #[error("execution reverted: {0}")]
    ExecutionReverted(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("workflow already in progress")]
    InProgress,
    #[error("workflow abandoned before completion")]
    Abandoned,
    #[error("shared state lock poisoned: {0}")]
    LockPoisoned(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("serde error: {0}")]
    Serde(String),
    #[error("io error: {0}")]
    Io(String),
}

impl ClientError {
    /// Wraps any failure raised while approving `token` into `ApprovalFailed`.
    /// Timeouts keep their own kind so callers can tell them apart.
    pub fn into_approval_failure(self, token: Address) -> ClientError {
        match self {
            err @ (ClientError::Timeout(_) | ClientError::ApprovalFailed { .. }) => err,
            other => ClientError::ApprovalFailed {
                token,
                reason: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serde(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for ClientError {
    fn from(err: toml::de::Error) -> Self {
        ClientError::Config(err.to_string())
    }
}
