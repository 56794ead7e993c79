use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use starknet::core::types::Felt;
use tokio::sync::watch;

use crate::allowance::AllowanceGate;
use crate::error::ClientError;
use crate::events::{confirm_event, AdapterEvent, TokensSwapped};
use crate::protocol::AdapterProtocol;
use crate::quote::Quote;
use crate::sequencer::{Plan, PrimaryCall, SequenceReport, TransactionSequencer, WorkflowStatus};
use crate::utils::{u128_to_u256_felts, Address, TxHash};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapRequest {
    pub token_in: Address,
    pub token_out: Address,
    pub fee: u32,
    pub amount_in: u128,
    pub min_amount_out: u128,
}

impl SwapRequest {
    pub fn new(
        token_in: Address,
        token_out: Address,
        fee: u32,
        amount_in: u128,
        min_amount_out: u128,
    ) -> Result<Self, ClientError> {
        let request = Self {
            token_in,
            token_out,
            fee,
            amount_in,
            min_amount_out,
        };
        request.validate()?;
        Ok(request)
    }

    /// Consumes a quote and derives the output floor from it.
    pub fn from_quote(quote: Quote, slippage_bps: u32, max_age: Duration) -> Result<Self, ClientError> {
        quote.ensure_fresh(max_age)?;
        let min_amount_out = quote.min_out(slippage_bps)?;
        Self::new(
            quote.token_in,
            quote.token_out,
            quote.fee,
            quote.amount_in,
            min_amount_out,
        )
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.token_in == Felt::ZERO || self.token_out == Felt::ZERO {
            return Err(ClientError::InvalidInput("token address is zero".to_string()));
        }
        if self.token_in == self.token_out {
            return Err(ClientError::InvalidInput(
                "token in and token out must differ".to_string(),
            ));
        }
        if self.amount_in == 0 {
            return Err(ClientError::InvalidInput("amount in is zero".to_string()));
        }
        Ok(())
    }

    /// `(token_in, token_out, fee, amount_in: u256, min_amount_out: u256)`.
    pub fn to_calldata(&self) -> Vec<Felt> {
        let mut calldata = vec![self.token_in, self.token_out, Felt::from(self.fee)];
        calldata.extend(u128_to_u256_felts(self.amount_in));
        calldata.extend(u128_to_u256_felts(self.min_amount_out));
        calldata
    }
}

/// One exact-input swap: approve the input token if needed, then swap with
/// the caller's floor. Nothing is re-quoted at execution time.
pub struct SwapWorkflow<P: AdapterProtocol + ?Sized> {
    protocol: Arc<P>,
    gate: Arc<AllowanceGate>,
    sequencer: TransactionSequencer,
    confirmation_timeout: Duration,
}

impl<P: AdapterProtocol + ?Sized> SwapWorkflow<P> {
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

    pub async fn swap_exact_input(&self, request: SwapRequest) -> Result<SequenceReport, ClientError> {
        let protocol = self.protocol.as_ref();
        let prepare = async move {
            request.validate()?;
            Plan::new(PrimaryCall::Swap(request.clone())).with_approval(
                request.token_in,
                protocol.adapter(),
                request.amount_in,
            )
        };
        self.sequencer
            .run_prepared(protocol, &self.gate, prepare)
            .await
    }

    /// Waits for the swap to settle and returns the realized amounts.
    pub async fn confirm_swap(&self, tx_hash: TxHash) -> Result<TokensSwapped, ClientError> {
        confirm_event(
            self.protocol.as_ref(),
            tx_hash,
            self.confirmation_timeout,
            |event| match event {
                AdapterEvent::TokensSwapped(swapped) => Some(swapped),
                _ => None,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn quote(amount_out: u128) -> Quote {
        Quote {
            token_in: Felt::from(1u8),
            token_out: Felt::from(2u8),
            fee: 3000,
            amount_in: 1_000,
            amount_out,
            retrieved_at: Instant::now(),
        }
    }

    #[test]
    fn from_quote_applies_slippage() {
        let request =
            SwapRequest::from_quote(quote(1_000_000), 500, Duration::from_secs(30)).expect("request");
        assert_eq!(request.min_amount_out, 995_000);
        assert_eq!(request.amount_in, 1_000);
        assert_eq!(request.fee, 3000);
    }

    #[test]
    fn rejects_same_token_and_zero_amount() {
        let token = Felt::from(1u8);
        assert!(SwapRequest::new(token, token, 3000, 10, 0).is_err());
        assert!(SwapRequest::new(token, Felt::from(2u8), 3000, 0, 0).is_err());
    }

    #[test]
    fn calldata_layout() {
        let request =
            SwapRequest::new(Felt::from(1u8), Felt::from(2u8), 500, 10, 9).expect("request");
        assert_eq!(
            request.to_calldata(),
            vec![
                Felt::from(1u8),
                Felt::from(2u8),
                Felt::from(500u32),
                Felt::from(10u8),
                Felt::ZERO,
                Felt::from(9u8),
                Felt::ZERO,
            ]
        );
    }
}
