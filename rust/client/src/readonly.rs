//! Account that can read on behalf of an address but never signs.

use async_trait::async_trait;
use starknet::accounts::{
    Account, ConnectedAccount, ExecutionEncoder, RawDeclarationV3, RawExecutionV3,
};
use starknet::core::types::{BlockId, BlockTag, Call, Felt};
use starknet::providers::Provider;
use starknet::signers::SignerInteractivityContext;

use crate::utils::Address;

#[derive(Debug, thiserror::Error)]
#[error("read-only account 0x{0:x} cannot sign")]
pub struct ReadOnlySignError(Felt);

/// Lets `StarknetAdapter` serve quotes, ticks and allowance reads without a
/// key. Any submission fails at signing time with `ExecutionRejected`.
#[derive(Debug, Clone)]
pub struct ReadOnlyAccount<P> {
    provider: P,
    address: Address,
    chain_id: Felt,
}

impl<P> ReadOnlyAccount<P> {
    pub fn new(provider: P, address: Address, chain_id: Felt) -> Self {
        Self {
            provider,
            address,
            chain_id,
        }
    }
}

#[async_trait]
impl<P> Account for ReadOnlyAccount<P>
where
    P: Send + Sync,
{
    type SignError = ReadOnlySignError;

    fn address(&self) -> Felt {
        self.address
    }

    fn chain_id(&self) -> Felt {
        self.chain_id
    }

    async fn sign_execution_v3(
        &self,
        _execution: &RawExecutionV3,
        _query_only: bool,
    ) -> Result<Vec<Felt>, Self::SignError> {
        Err(ReadOnlySignError(self.address))
    }

    async fn sign_declaration_v3(
        &self,
        _declaration: &RawDeclarationV3,
        _query_only: bool,
    ) -> Result<Vec<Felt>, Self::SignError> {
        Err(ReadOnlySignError(self.address))
    }

    fn is_signer_interactive(&self, _context: SignerInteractivityContext<'_>) -> bool {
        false
    }
}

impl<P> ExecutionEncoder for ReadOnlyAccount<P>
where
    P: Send + Sync,
{
    fn encode_calls(&self, calls: &[Call]) -> Vec<Felt> {
        let mut calldata: Vec<Felt> = vec![calls.len().into()];
        for call in calls {
            calldata.push(call.to);
            calldata.push(call.selector);
            calldata.push(call.calldata.len().into());
            calldata.extend_from_slice(&call.calldata);
        }
        calldata
    }
}

#[async_trait]
impl<P> ConnectedAccount for ReadOnlyAccount<P>
where
    P: Provider + Sync + Send,
{
    type Provider = P;

    fn provider(&self) -> &Self::Provider {
        &self.provider
    }

    fn block_id(&self) -> BlockId {
        BlockId::Tag(BlockTag::Latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_calls_in_cairo1_layout() {
        let account = ReadOnlyAccount::new((), Felt::from(9u8), Felt::ONE);
        let calls = vec![Call {
            to: Felt::from(1u8),
            selector: Felt::from(2u8),
            calldata: vec![Felt::from(3u8), Felt::from(4u8)],
        }];
        assert_eq!(
            account.encode_calls(&calls),
            vec![
                Felt::ONE,
                Felt::from(1u8),
                Felt::from(2u8),
                Felt::from(2u8),
                Felt::from(3u8),
                Felt::from(4u8),
            ]
        );
        assert_eq!(account.address(), Felt::from(9u8));
    }
}
