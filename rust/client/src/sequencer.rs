//! Ordered approve-then-execute state machine.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::allowance::{AllowanceGate, AllowanceKey, ApprovalOutcome};
use crate::error::ClientError;
use crate::liquidity::{AddLiquidityRequest, WithdrawRequest};
use crate::protocol::AdapterProtocol;
use crate::swap::SwapRequest;
use crate::utils::{felt_to_hex, Address, TxHash};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowStatus {
    Idle,
    /// Waiting on the approval at this index of the plan.
    Approving(usize),
    Executing,
    Succeeded,
    Failed(ClientError),
}

impl WorkflowStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, WorkflowStatus::Approving(_) | WorkflowStatus::Executing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Succeeded | WorkflowStatus::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalStep {
    pub token: Address,
    pub spender: Address,
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryCall {
    Swap(SwapRequest),
    AddLiquidity(AddLiquidityRequest),
    WithdrawLiquidity(WithdrawRequest),
}

impl PrimaryCall {
    pub fn name(&self) -> &'static str {
        match self {
            PrimaryCall::Swap(_) => "swap_exact_input",
            PrimaryCall::AddLiquidity(_) => "add_liquidity",
            PrimaryCall::WithdrawLiquidity(_) => "withdraw_liquidity",
        }
    }
}

/// Approval steps followed by exactly one primary call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    approvals: Vec<ApprovalStep>,
    primary: PrimaryCall,
}

impl Plan {
    pub fn new(primary: PrimaryCall) -> Self {
        Self {
            approvals: Vec::new(),
            primary,
        }
    }

    /// Adds an approval requirement. Zero amounts need no approval and are
    /// skipped; a repeated token/spender pair accumulates into one step.
    pub fn with_approval(
        mut self,
        token: Address,
        spender: Address,
        amount: u128,
    ) -> Result<Self, ClientError> {
        if amount == 0 {
            return Ok(self);
        }
        if let Some(step) = self
            .approvals
            .iter_mut()
            .find(|step| step.token == token && step.spender == spender)
        {
            step.amount = step.amount.checked_add(amount).ok_or_else(|| {
                ClientError::InvalidInput("approval amount overflows u128".to_string())
            })?;
            return Ok(self);
        }
        self.approvals.push(ApprovalStep {
            token,
            spender,
            amount,
        });
        Ok(self)
    }

    pub fn approvals(&self) -> &[ApprovalStep] {
        &self.approvals
    }

    pub fn primary(&self) -> &PrimaryCall {
        &self.primary
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRecord {
    pub index: usize,
    pub step: ApprovalStep,
    pub outcome: ApprovalOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceReport {
    pub approvals: Vec<ApprovalRecord>,
    pub tx_hash: TxHash,
}

impl SequenceReport {
    pub fn approvals_submitted(&self) -> usize {
        self.approvals
            .iter()
            .filter(|record| matches!(record.outcome, ApprovalOutcome::Approved { .. }))
            .count()
    }
}

/// Drives one plan at a time. The status is owned here and only `run`
/// transitions it.
#[derive(Debug)]
pub struct TransactionSequencer {
    status: watch::Sender<WorkflowStatus>,
    running: AtomicBool,
    completed: Mutex<Vec<ApprovalRecord>>,
    submission_timeout: Duration,
}

impl TransactionSequencer {
    pub fn new(submission_timeout: Duration) -> Self {
        let (status, _) = watch::channel(WorkflowStatus::Idle);
        Self {
            status,
            running: AtomicBool::new(false),
            completed: Mutex::new(Vec::new()),
            submission_timeout,
        }
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowStatus> {
        self.status.subscribe()
    }

    /// Approval steps the latest run got through, including on failure.
    pub fn completed_steps(&self) -> Vec<ApprovalRecord> {
        self.completed
            .lock()
            .map(|steps| steps.clone())
            .unwrap_or_default()
    }

    pub async fn run<P>(
        &self,
        protocol: &P,
        gate: &AllowanceGate,
        plan: Plan,
    ) -> Result<SequenceReport, ClientError>
    where
        P: AdapterProtocol + ?Sized,
    {
        self.run_prepared(protocol, gate, async move { Ok::<_, ClientError>(plan) })
            .await
    }

    /// Runs `prepare` as the first stage of the workflow and then the plan it
    /// builds. Validation and pool reads done in `prepare` count as part of
    /// the run: they are refused while another run is active and their
    /// failures end in `Failed`.
    pub async fn run_prepared<P, F>(
        &self,
        protocol: &P,
        gate: &AllowanceGate,
        prepare: F,
    ) -> Result<SequenceReport, ClientError>
    where
        P: AdapterProtocol + ?Sized,
        F: Future<Output = Result<Plan, ClientError>>,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("rejected re-invocation of active workflow");
            return Err(ClientError::InProgress);
        }
        let mut guard = RunGuard {
            sequencer: self,
            settled: false,
        };
        if let Ok(mut steps) = self.completed.lock() {
            steps.clear();
        }
        self.transition(WorkflowStatus::Idle);

        let plan = match prepare.await {
            Ok(plan) => plan,
            Err(err) => return guard.fail(err),
        };

        let owner = protocol.signer();
        for (index, step) in plan.approvals.iter().enumerate() {
            let key = AllowanceKey {
                owner,
                token: step.token,
                spender: step.spender,
            };
            let needed = match gate.needs_approval(protocol, &key, step.amount).await {
                Ok(needed) => needed,
                Err(err) => return guard.fail(err.into_approval_failure(step.token)),
            };
            let outcome = if needed {
                self.transition(WorkflowStatus::Approving(index));
                match gate.check_and_ensure(protocol, key, step.amount).await {
                    Ok(outcome) => outcome,
                    Err(err) => return guard.fail(err),
                }
            } else {
                debug!(index, token = %felt_to_hex(step.token), "allowance already sufficient");
                ApprovalOutcome::Sufficient
            };
            self.record(ApprovalRecord {
                index,
                step: *step,
                outcome,
            });
        }

        self.transition(WorkflowStatus::Executing);
        info!(call = plan.primary.name(), "submitting primary call");
        let tx_hash = match timeout(self.submission_timeout, submit(protocol, &plan.primary)).await
        {
            Err(_) => {
                return guard.fail(ClientError::Timeout(format!(
                    "{} submission",
                    plan.primary.name()
                )))
            }
            Ok(Err(err)) => return guard.fail(err),
            Ok(Ok(tx_hash)) => tx_hash,
        };

        for step in &plan.approvals {
            gate.invalidate(&AllowanceKey {
                owner,
                token: step.token,
                spender: step.spender,
            });
        }
        self.transition(WorkflowStatus::Succeeded);
        guard.settled = true;
        info!(call = plan.primary.name(), tx_hash = %felt_to_hex(tx_hash), "primary call accepted");
        Ok(SequenceReport {
            approvals: self.completed_steps(),
            tx_hash,
        })
    }

    fn transition(&self, next: WorkflowStatus) {
        debug!(status = ?next, "workflow transition");
        self.status.send_replace(next);
    }

    fn record(&self, record: ApprovalRecord) {
        if let Ok(mut steps) = self.completed.lock() {
            steps.push(record);
        }
    }
}

async fn submit<P>(protocol: &P, primary: &PrimaryCall) -> Result<TxHash, ClientError>
where
    P: AdapterProtocol + ?Sized,
{
    match primary {
        PrimaryCall::Swap(request) => protocol.swap_exact_input(request).await,
        PrimaryCall::AddLiquidity(request) => protocol.add_liquidity(request).await,
        PrimaryCall::WithdrawLiquidity(request) => protocol.withdraw_liquidity(request).await,
    }
}

/// Releases the sequencer when a run ends, including when its future is
/// dropped mid-flight, which leaves the status at `Failed(Abandoned)`.
struct RunGuard<'a> {
    sequencer: &'a TransactionSequencer,
    settled: bool,
}

impl RunGuard<'_> {
    fn fail<T>(&mut self, err: ClientError) -> Result<T, ClientError> {
        warn!(error = %err, "workflow failed");
        self.sequencer
            .transition(WorkflowStatus::Failed(err.clone()));
        self.settled = true;
        Err(err)
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.sequencer
                .status
                .send_replace(WorkflowStatus::Failed(ClientError::Abandoned));
        }
        self.sequencer.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liquidity::PositionId;
    use starknet::core::types::Felt;

    fn withdraw() -> PrimaryCall {
        PrimaryCall::WithdrawLiquidity(WithdrawRequest {
            position_id: PositionId(1),
            liquidity: 10,
            min_amount0: 0,
            min_amount1: 0,
        })
    }

    #[test]
    fn plan_merges_repeated_tokens_and_skips_zero() {
        let token = Felt::from(7u8);
        let other = Felt::from(8u8);
        let spender = Felt::from(9u8);
        let plan = Plan::new(withdraw())
            .with_approval(token, spender, 5)
            .and_then(|plan| plan.with_approval(other, spender, 0))
            .and_then(|plan| plan.with_approval(token, spender, 6))
            .expect("plan");
        assert_eq!(plan.approvals().len(), 1);
        assert_eq!(plan.approvals()[0].amount, 11);
    }

    #[test]
    fn plan_rejects_overflowing_sum() {
        let token = Felt::from(7u8);
        let result = Plan::new(withdraw())
            .with_approval(token, token, u128::MAX)
            .and_then(|plan| plan.with_approval(token, token, 1));
        assert!(matches!(result, Err(ClientError::InvalidInput(_))));
    }

    #[test]
    fn active_and_terminal_states() {
        assert!(WorkflowStatus::Approving(0).is_active());
        assert!(WorkflowStatus::Executing.is_active());
        assert!(!WorkflowStatus::Idle.is_active());
        assert!(WorkflowStatus::Failed(ClientError::Abandoned).is_terminal());
        assert!(!WorkflowStatus::Executing.is_terminal());
    }

    #[test]
    fn fresh_sequencer_is_idle() {
        let sequencer = TransactionSequencer::new(Duration::from_secs(1));
        assert_eq!(sequencer.status(), WorkflowStatus::Idle);
        assert!(sequencer.completed_steps().is_empty());
    }
}
