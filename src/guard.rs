//! Transfer guard
//!
//! Entry point for agent tools and the operator CLI. Wires policy, intent
//! store, executor and ledger together and turns policy decisions into
//! outcomes a caller can report back.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::alerts::{format_cents, AlertSender};
use crate::config::{BackendKind, Config};
use crate::error::{Error, Result};
use crate::execution::{ConwayClient, CreditTransferApi, ExecutionBackend, TransferExecutor};
use crate::intent::{
    IntentDraft, IntentSource, IntentStatus, IntentStore, KeyValueStore, LedgerEntry,
    RejectionRecord, RequestedBy, TransactionLedger, TransferIntent,
};
use crate::policy::{PolicyDecision, PolicyEngine, PolicyEvaluation, PolicyRequest};

lazy_static! {
    static ref EVM_ADDRESS: Regex =
        Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("Invalid address regex");
}

/// Check that `address` looks like a 20-byte hex account address
pub fn validate_address(address: &str) -> Result<()> {
    if EVM_ADDRESS.is_match(address) {
        Ok(())
    } else {
        Err(Error::InvalidAddress(address.to_string()))
    }
}

/// A caller asking to move funds
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub to_address: String,
    pub amount_cents: i64,
    pub reason: Option<String>,
    pub requested_by: RequestedBy,
    pub source: IntentSource,
    pub child_id: Option<String>,
}

impl TransferRequest {
    /// Agent-initiated credit transfer
    pub fn agent(to_address: impl Into<String>, amount_cents: i64) -> Self {
        Self {
            to_address: to_address.into(),
            amount_cents,
            reason: None,
            requested_by: RequestedBy::Agent,
            source: IntentSource::TransferCredits,
            child_id: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    fn has_reason(&self) -> bool {
        self.reason.as_deref().is_some_and(|r| !r.trim().is_empty())
    }
}

/// What happened to a transfer request
#[derive(Debug, Clone)]
pub enum TransferOutcome {
    /// Refused; nothing was stored
    Blocked {
        evaluation: PolicyEvaluation,
        message: String,
    },
    /// Stored and waiting for a human
    PendingApproval { intent: TransferIntent },
    /// Stored as approved; execution left to the caller
    Approved { intent: TransferIntent },
    /// Approved and handed to the execution backend
    Dispatched { intent: TransferIntent },
}

impl TransferOutcome {
    /// Stored intent, if any
    pub fn intent(&self) -> Option<&TransferIntent> {
        match self {
            TransferOutcome::Blocked { .. } => None,
            TransferOutcome::PendingApproval { intent }
            | TransferOutcome::Approved { intent }
            | TransferOutcome::Dispatched { intent } => Some(intent),
        }
    }

    /// Human-readable summary for the tool response
    pub fn message(&self) -> String {
        match self {
            TransferOutcome::Blocked { message, .. } => message.clone(),
            TransferOutcome::PendingApproval { intent } => format!(
                "Transfer of {} to {} is awaiting human approval (intent {}; {}).",
                format_cents(intent.amount_cents),
                intent.to_address,
                intent.id,
                intent.policy.reason_codes()
            ),
            TransferOutcome::Approved { intent } => format!(
                "Transfer of {} to {} approved (intent {}). \
                 Run `transfer-guard execute {}` to send it.",
                format_cents(intent.amount_cents),
                intent.to_address,
                intent.id,
                intent.id
            ),
            TransferOutcome::Dispatched { intent } => {
                let (backend, reference) = intent
                    .execution
                    .as_ref()
                    .map(|e| (e.backend.to_string(), e.transaction_ref.clone()))
                    .unwrap_or_else(|| ("unknown".into(), None));
                format!(
                    "Transfer of {} to {} {} via {} (intent {}{}).",
                    format_cents(intent.amount_cents),
                    intent.to_address,
                    intent.status,
                    backend,
                    intent.id,
                    reference.map(|r| format!(", ref {}", r)).unwrap_or_default()
                )
            }
        }
    }
}

/// Guardrail over outbound transfers
pub struct TransferGuard {
    policy: PolicyEngine,
    store: Arc<IntentStore>,
    ledger: Arc<TransactionLedger>,
    executor: TransferExecutor,
    platform: Arc<dyn CreditTransferApi>,
    auto_execute: bool,
}

impl TransferGuard {
    /// Assemble a guard from explicit collaborators
    pub fn new(
        config: &Config,
        store: Arc<IntentStore>,
        ledger: Arc<TransactionLedger>,
        platform: Arc<dyn CreditTransferApi>,
    ) -> Result<Self> {
        let backend = ExecutionBackend::from_config(config, platform.clone())?;
        info!(
            "Transfer guard ready (backend: {}, auto-execute: {})",
            backend.kind(),
            config.execution.auto_execute_on_approval
        );

        Ok(Self {
            policy: PolicyEngine::new(config.policy.clone()),
            executor: TransferExecutor::new(store.clone(), ledger.clone(), backend),
            store,
            ledger,
            platform,
            auto_execute: config.execution.auto_execute_on_approval,
        })
    }

    /// Build the guard with the HTTP platform client
    pub fn from_config(
        config: &Config,
        kv: Arc<dyn KeyValueStore>,
        alerts: AlertSender,
    ) -> Result<Self> {
        let platform: Arc<dyn CreditTransferApi> = Arc::new(ConwayClient::new(&config.conway)?);
        let store = Arc::new(IntentStore::new(kv.clone(), alerts));
        let ledger = Arc::new(TransactionLedger::new(kv));
        Self::new(config, store, ledger, platform)
    }

    pub fn backend(&self) -> BackendKind {
        self.executor.backend_kind()
    }

    /// Evaluate a request against current balance and spend without storing it
    pub async fn evaluate(&self, request: &TransferRequest) -> Result<PolicyEvaluation> {
        validate_address(&request.to_address)?;

        let balance_cents = self.platform.get_balance_cents().await?;
        let spent_last_24h_cents = self.store.sum_spend_last_24h().await?;

        Ok(self.policy.evaluate(&PolicyRequest {
            to_address: request.to_address.clone(),
            amount_cents: request.amount_cents,
            balance_cents,
            spent_last_24h_cents,
        }))
    }

    /// Evaluate and, when allowed, record a transfer
    ///
    /// Auto-approved transfers are executed immediately when auto-execute is
    /// on; an execution failure is returned after being recorded.
    pub async fn request_transfer(&self, request: TransferRequest) -> Result<TransferOutcome> {
        let evaluation = self.evaluate(&request).await?;
        debug!(
            "Policy decision for {} cents to {}: {} [{}]",
            request.amount_cents,
            request.to_address,
            evaluation.decision,
            evaluation.reason_codes()
        );

        match evaluation.decision {
            PolicyDecision::Reject => {
                warn!(
                    "Blocked transfer of {} cents to {}: {}",
                    request.amount_cents,
                    request.to_address,
                    evaluation.reason_codes()
                );
                let message = format!(
                    "Transfer blocked by policy: {}.",
                    evaluation.reason_codes()
                );
                return Ok(TransferOutcome::Blocked {
                    evaluation,
                    message,
                });
            }
            PolicyDecision::RequireHuman if !request.has_reason() => {
                info!(
                    "Transfer of {} cents to {} needs approval but has no reason",
                    request.amount_cents, request.to_address
                );
                let message = format!(
                    "Transfer blocked: human approval is required ({}). \
                     Provide a reason so an operator can review the request.",
                    evaluation.reason_codes()
                );
                return Ok(TransferOutcome::Blocked {
                    evaluation,
                    message,
                });
            }
            PolicyDecision::RequireHuman | PolicyDecision::AutoApprove => {}
        }

        let draft = IntentDraft {
            requested_by: request.requested_by,
            source: request.source,
            to_address: request.to_address,
            amount_cents: request.amount_cents,
            reason: request.reason.filter(|r| !r.trim().is_empty()),
            child_id: request.child_id,
        };
        let intent = TransferIntent::new(draft, evaluation)
            .ok_or_else(|| Error::Internal("rejected decision reached intent creation".into()))?;
        let intent = self.store.append(intent).await?;

        match intent.status {
            IntentStatus::PendingApproval => Ok(TransferOutcome::PendingApproval { intent }),
            IntentStatus::Approved if self.auto_execute => {
                let intent = self
                    .executor
                    .execute(&intent.id, &intent.requested_by.to_string())
                    .await?;
                Ok(TransferOutcome::Dispatched { intent })
            }
            _ => Ok(TransferOutcome::Approved { intent }),
        }
    }

    /// Approve an intent, executing it when auto-execute is on
    pub async fn approve(
        &self,
        id: &str,
        approved_by: &str,
        note: Option<&str>,
    ) -> Result<TransferIntent> {
        let intent = self
            .store
            .approve(id, approved_by, note)
            .await?
            .ok_or_else(|| Error::IntentNotFound(id.to_string()))?;

        if self.auto_execute && intent.status == IntentStatus::Approved {
            return self.executor.execute(id, approved_by).await;
        }
        Ok(intent)
    }

    /// Reject an intent
    pub async fn reject(
        &self,
        id: &str,
        rejected_by: &str,
        reason: &str,
    ) -> Result<TransferIntent> {
        self.store
            .reject(id, RejectionRecord::new(rejected_by, reason))
            .await?
            .ok_or_else(|| Error::IntentNotFound(id.to_string()))
    }

    /// Execute an approved intent
    pub async fn execute(&self, id: &str, executed_by: &str) -> Result<TransferIntent> {
        self.executor.execute(id, executed_by).await
    }

    pub async fn list(
        &self,
        status: Option<IntentStatus>,
        limit: usize,
    ) -> Result<Vec<TransferIntent>> {
        self.store.list(status, limit).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<TransferIntent>> {
        self.store.get_by_id(id).await
    }

    /// Spend counted against the daily limit
    pub async fn spent_last_24h(&self) -> Result<i64> {
        self.store.sum_spend_last_24h().await
    }

    pub async fn balance_cents(&self) -> Result<i64> {
        self.platform.get_balance_cents().await
    }

    /// Most recent ledger entries, newest first
    pub async fn ledger(&self, limit: usize) -> Result<Vec<LedgerEntry>> {
        self.ledger.recent(limit).await
    }

    pub async fn ledger_for(&self, intent_id: &str) -> Result<Vec<LedgerEntry>> {
        self.ledger.for_intent(intent_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::execution::CreditTransfer;
    use crate::intent::MemoryKv;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    const TO: &str = "0x00000000000000000000000000000000000000aa";

    struct FakePlatform {
        balance_cents: i64,
        transfers: AtomicU32,
    }

    #[async_trait]
    impl CreditTransferApi for FakePlatform {
        async fn transfer_credits(
            &self,
            _to_address: &str,
            _amount_cents: i64,
            _reason: Option<&str>,
        ) -> Result<CreditTransfer> {
            self.transfers.fetch_add(1, Ordering::SeqCst);
            Ok(CreditTransfer {
                status: "completed".into(),
                transfer_id: Some("t-1".into()),
            })
        }

        async fn get_balance_cents(&self) -> Result<i64> {
            Ok(self.balance_cents)
        }
    }

    fn guard(policy: PolicyConfig, auto_execute: bool) -> (TransferGuard, Arc<FakePlatform>) {
        let mut config = Config::default();
        config.policy = policy;
        config.execution.auto_execute_on_approval = auto_execute;

        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKv::new());
        let platform = Arc::new(FakePlatform {
            balance_cents: 100_000,
            transfers: AtomicU32::new(0),
        });
        let guard = TransferGuard::new(
            &config,
            Arc::new(IntentStore::new(kv.clone(), AlertSender::disabled())),
            Arc::new(TransactionLedger::new(kv)),
            platform.clone(),
        )
        .unwrap();
        (guard, platform)
    }

    fn allowlisted() -> PolicyConfig {
        PolicyConfig {
            allowlist: vec![TO.into()],
            ..PolicyConfig::default()
        }
    }

    #[test]
    fn test_validate_address() {
        assert!(validate_address(TO).is_ok());
        assert!(validate_address("0x00000000000000000000000000000000000000AA").is_ok());
        assert!(validate_address("0x123").is_err());
        assert!(validate_address("00000000000000000000000000000000000000aa00").is_err());
        assert!(validate_address("0x00000000000000000000000000000000000000zz").is_err());
    }

    #[tokio::test]
    async fn test_invalid_address_is_error() {
        let (guard, _) = guard(PolicyConfig::default(), false);
        let err = guard
            .request_transfer(TransferRequest::agent("not-an-address", 50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_reject_decision_stores_nothing() {
        let (guard, _) = guard(allowlisted(), false);
        let outcome = guard
            .request_transfer(TransferRequest::agent(TO, 9_999).with_reason("too much"))
            .await
            .unwrap();

        assert!(matches!(outcome, TransferOutcome::Blocked { .. }));
        assert!(outcome.message().contains("above_hard_per_transfer_limit"));
        assert!(guard.list(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_auto_execute_on_request() {
        let (guard, platform) = guard(allowlisted(), true);
        let outcome = guard
            .request_transfer(TransferRequest::agent(TO, 50))
            .await
            .unwrap();

        let TransferOutcome::Dispatched { intent } = &outcome else {
            panic!("expected Dispatched, got {outcome:?}");
        };
        assert_eq!(intent.status, IntentStatus::Executed);
        assert_eq!(platform.transfers.load(Ordering::SeqCst), 1);
        assert!(outcome.message().contains("ref t-1"));
        assert_eq!(guard.ledger(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_approve_runs_execution_when_enabled() {
        let (guard, platform) = guard(PolicyConfig::default(), true);
        let outcome = guard
            .request_transfer(TransferRequest::agent(TO, 50).with_reason("new vendor"))
            .await
            .unwrap();
        let intent = outcome.intent().unwrap().clone();
        assert_eq!(intent.status, IntentStatus::PendingApproval);

        let done = guard.approve(&intent.id, "operator", None).await.unwrap();
        assert_eq!(done.status, IntentStatus::Executed);
        assert_eq!(platform.transfers.load(Ordering::SeqCst), 1);

        // Re-approval of an executed intent neither changes it nor re-sends
        let again = guard.approve(&intent.id, "operator", None).await.unwrap();
        assert_eq!(again.status, IntentStatus::Executed);
        assert_eq!(platform.transfers.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_daily_spend_feeds_policy() {
        let (guard, _) = guard(
            PolicyConfig {
                hard_daily_limit_cents: 100,
                ..allowlisted()
            },
            true,
        );

        let first = guard
            .request_transfer(TransferRequest::agent(TO, 60))
            .await
            .unwrap();
        assert!(matches!(first, TransferOutcome::Dispatched { .. }));
        assert_eq!(guard.spent_last_24h().await.unwrap(), 60);

        let second = guard
            .request_transfer(TransferRequest::agent(TO, 60).with_reason("second batch"))
            .await
            .unwrap();
        let TransferOutcome::PendingApproval { intent } = second else {
            panic!("expected PendingApproval");
        };
        assert!(intent.policy.reason_codes().contains("above_hard_daily_limit"));
    }

    #[tokio::test]
    async fn test_reject_and_missing_ids() {
        let (guard, _) = guard(PolicyConfig::default(), false);
        let outcome = guard
            .request_transfer(TransferRequest::agent(TO, 50).with_reason("vendor"))
            .await
            .unwrap();
        let id = outcome.intent().unwrap().id.clone();

        let rejected = guard.reject(&id, "operator", "unknown vendor").await.unwrap();
        assert_eq!(rejected.status, IntentStatus::Rejected);

        assert!(matches!(
            guard.reject("missing", "operator", "x").await.unwrap_err(),
            Error::IntentNotFound(_)
        ));
        assert!(matches!(
            guard.approve("missing", "operator", None).await.unwrap_err(),
            Error::IntentNotFound(_)
        ));
    }
}
