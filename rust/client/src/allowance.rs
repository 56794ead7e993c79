//! Allowance cache and approval gating.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::ClientError;
use crate::protocol::AdapterProtocol;
use crate::utils::{felt_to_hex, Address, TxHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllowanceKey {
    pub owner: Address,
    pub token: Address,
    pub spender: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowanceState {
    pub amount: u128,
    pub fresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// Allowance already covered the requirement; nothing was submitted.
    Sufficient,
    /// An approval was submitted and reached finality.
    Approved { tx_hash: TxHash },
}

/// Check-and-ensure approvals for (owner, token, spender) triples.
///
/// Every write invalidates the cached entry and only a ledger read makes it
/// fresh again. At most one approval per triple is in flight; later callers
/// wait on the triple's lock and re-check before submitting anything.
#[derive(Debug)]
pub struct AllowanceGate {
    cache: Mutex<HashMap<AllowanceKey, AllowanceState>>,
    in_flight: Mutex<HashMap<AllowanceKey, Arc<tokio::sync::Mutex<()>>>>,
    confirmation_timeout: Duration,
}

impl AllowanceGate {
    pub fn new(confirmation_timeout: Duration) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            confirmation_timeout,
        }
    }

    pub fn cached(&self, key: &AllowanceKey) -> Option<AllowanceState> {
        self.cache.lock().ok()?.get(key).copied()
    }

    pub fn invalidate(&self, key: &AllowanceKey) {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(state) = cache.get_mut(key) {
                state.fresh = false;
            }
        }
    }

    pub async fn refresh<P>(&self, protocol: &P, key: &AllowanceKey) -> Result<u128, ClientError>
    where
        P: AdapterProtocol + ?Sized,
    {
        let amount = protocol.allowance(key.token, key.owner, key.spender).await?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                *key,
                AllowanceState {
                    amount,
                    fresh: true,
                },
            );
        }
        Ok(amount)
    }

    /// Fresh cached amount, or a ledger read when the entry is stale or missing.
    pub async fn current<P>(&self, protocol: &P, key: &AllowanceKey) -> Result<u128, ClientError>
    where
        P: AdapterProtocol + ?Sized,
    {
        match self.cached(key) {
            Some(state) if state.fresh => Ok(state.amount),
            _ => self.refresh(protocol, key).await,
        }
    }

    pub async fn needs_approval<P>(
        &self,
        protocol: &P,
        key: &AllowanceKey,
        required: u128,
    ) -> Result<bool, ClientError>
    where
        P: AdapterProtocol + ?Sized,
    {
        Ok(self.current(protocol, key).await? < required)
    }

    pub async fn check_and_ensure<P>(
        &self,
        protocol: &P,
        key: AllowanceKey,
        required: u128,
    ) -> Result<ApprovalOutcome, ClientError>
    where
        P: AdapterProtocol + ?Sized,
    {
        let failed = |err: ClientError| err.into_approval_failure(key.token);

        if self.current(protocol, &key).await.map_err(failed)? >= required {
            return Ok(ApprovalOutcome::Sufficient);
        }

        let slot = self.claim(&key)?;
        let _guard = slot.lock.lock().await;

        // another caller may have confirmed an approval while we waited
        if self.current(protocol, &key).await.map_err(failed)? >= required {
            debug!(token = %felt_to_hex(key.token), "allowance satisfied by in-flight approval");
            return Ok(ApprovalOutcome::Sufficient);
        }

        info!(token = %felt_to_hex(key.token), required, "submitting approval");
        let tx_hash = protocol
            .approve(key.token, key.spender, required)
            .await
            .map_err(failed)?;
        self.invalidate(&key);

        match timeout(self.confirmation_timeout, protocol.wait_for_finality(tx_hash)).await {
            Err(_) => {
                return Err(ClientError::Timeout(format!(
                    "approval {} finality",
                    felt_to_hex(tx_hash)
                )))
            }
            Ok(result) => {
                result.map_err(failed)?;
            }
        }

        let observed = self.refresh(protocol, &key).await.map_err(failed)?;
        if observed < required {
            return Err(ClientError::ApprovalFailed {
                token: key.token,
                reason: format!("allowance {observed} below required {required} after approval"),
            });
        }
        info!(token = %felt_to_hex(key.token), tx_hash = %felt_to_hex(tx_hash), "approval confirmed");
        Ok(ApprovalOutcome::Approved { tx_hash })
    }

    fn claim(&self, key: &AllowanceKey) -> Result<InFlight<'_>, ClientError> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| ClientError::LockPoisoned("in-flight approvals".to_string()))?;
        let lock = in_flight.entry(*key).or_default().clone();
        Ok(InFlight {
            gate: self,
            key: *key,
            lock,
        })
    }

    /// Triples with an approval being checked or submitted right now.
    pub fn in_flight_approvals(&self) -> usize {
        self.in_flight.lock().map(|map| map.len()).unwrap_or_default()
    }
}

/// A caller's hold on the approval lock of one triple. The map entry is
/// dropped with the last holder.
struct InFlight<'a> {
    gate: &'a AllowanceGate,
    key: AllowanceKey,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.gate.in_flight.lock() {
            // release our handle while no new handle can be cloned out
            drop(std::mem::take(&mut self.lock));
            let idle = in_flight
                .get(&self.key)
                .is_some_and(|lock| Arc::strong_count(lock) == 1);
            if idle {
                in_flight.remove(&self.key);
            }
        }
    }
}
