//! Execution dispatcher
//!
//! Moves an approved intent through the configured backend and records the
//! outcome. Backend failures are written to the intent as `failed` and then
//! returned to the caller.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::{BackendKind, Config};
use crate::error::{Error, Result};
use crate::intent::{
    ExecutionRecord, IntentStatus, IntentStore, LedgerEntry, TransactionLedger, TransferIntent,
};

use super::conway::CreditTransferApi;
use super::vultisig::VultisigBroker;

/// Backend chosen once at construction
pub enum ExecutionBackend {
    /// Platform credit transfer
    Conway(Arc<dyn CreditTransferApi>),
    /// Wallet-signing broker
    Vultisig(VultisigBroker),
}

impl ExecutionBackend {
    /// Build the configured backend
    pub fn from_config(config: &Config, platform: Arc<dyn CreditTransferApi>) -> Result<Self> {
        match config.execution.backend {
            BackendKind::Conway => Ok(Self::Conway(platform)),
            BackendKind::Vultisig => Ok(Self::Vultisig(VultisigBroker::from_config(
                &config.vultisig,
            )?)),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            ExecutionBackend::Conway(_) => BackendKind::Conway,
            ExecutionBackend::Vultisig(_) => BackendKind::Vultisig,
        }
    }
}

/// Normalized result of one backend call
struct Attempt {
    status: IntentStatus,
    transaction_ref: Option<String>,
    message: String,
}

/// Executes approved intents
pub struct TransferExecutor {
    store: Arc<IntentStore>,
    ledger: Arc<TransactionLedger>,
    backend: ExecutionBackend,
}

impl TransferExecutor {
    pub fn new(
        store: Arc<IntentStore>,
        ledger: Arc<TransactionLedger>,
        backend: ExecutionBackend,
    ) -> Self {
        Self {
            store,
            ledger,
            backend,
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Execute an approved intent
    ///
    /// Fails without side effects when the intent is missing or not
    /// `approved`. Not idempotent: two calls on the same approved intent
    /// reach the backend twice if both observe `approved`.
    pub async fn execute(&self, id: &str, executed_by: &str) -> Result<TransferIntent> {
        let intent = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| Error::IntentNotFound(id.to_string()))?;

        if intent.status != IntentStatus::Approved {
            return Err(Error::IntentNotApproved {
                id: intent.id,
                status: intent.status,
            });
        }

        let backend = self.backend.kind();
        info!(
            "Executing intent {} via {}: {} cents to {}",
            intent.id, backend, intent.amount_cents, intent.to_address
        );

        let attempt = match self.dispatch(&intent).await {
            Ok(attempt) => attempt,
            Err(e) => {
                error!("Execution of intent {} via {} failed: {}", intent.id, backend, e);
                self.record_failure(&intent, executed_by, &e).await;
                return Err(e);
            }
        };

        let entry = LedgerEntry::transfer_out(&intent, backend, attempt.transaction_ref.clone());
        if let Err(e) = self.ledger.append(entry).await {
            warn!("Failed to append ledger entry for intent {}: {}", intent.id, e);
        }

        let record = ExecutionRecord {
            backend,
            transaction_ref: attempt.transaction_ref,
            message: attempt.message,
            executed_by: executed_by.to_string(),
            executed_at: Utc::now(),
        };

        self.store
            .set_execution(&intent.id, attempt.status, record)
            .await?
            .ok_or_else(|| Error::IntentNotFound(intent.id.clone()))
    }

    async fn dispatch(&self, intent: &TransferIntent) -> Result<Attempt> {
        match &self.backend {
            ExecutionBackend::Conway(platform) => {
                let transfer = platform
                    .transfer_credits(
                        &intent.to_address,
                        intent.amount_cents,
                        intent.reason.as_deref(),
                    )
                    .await
                    .map_err(|e| match e {
                        Error::PlatformTransfer(_) => e,
                        other => Error::PlatformTransfer(other.to_string()),
                    })?;

                let status = if transfer.is_completed() {
                    IntentStatus::Executed
                } else {
                    IntentStatus::Submitted
                };

                Ok(Attempt {
                    status,
                    message: format!("Platform transfer {}", transfer.status),
                    transaction_ref: transfer.transfer_id,
                })
            }
            ExecutionBackend::Vultisig(broker) => {
                let submission = broker.submit(intent).await;
                if !submission.ok {
                    return Err(Error::Broker(submission.message));
                }

                Ok(Attempt {
                    status: IntentStatus::Submitted,
                    transaction_ref: submission.transaction_ref,
                    message: format!("{} ({})", submission.message, submission.status),
                })
            }
        }
    }

    async fn record_failure(&self, intent: &TransferIntent, executed_by: &str, cause: &Error) {
        let message = match cause {
            Error::PlatformTransfer(m) | Error::Broker(m) => m.clone(),
            other => other.to_string(),
        };
        let record = ExecutionRecord {
            backend: self.backend.kind(),
            transaction_ref: None,
            message,
            executed_by: executed_by.to_string(),
            executed_at: Utc::now(),
        };

        if let Err(e) = self
            .store
            .set_execution(&intent.id, IntentStatus::Failed, record)
            .await
        {
            error!("Failed to record execution failure for {}: {}", intent.id, e);
        }
    }
}
