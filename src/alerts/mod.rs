//! Operator alerts
//!
//! Intent creation and status changes are pushed to a chat channel so a human
//! can follow (and act on) what the agent is requesting.
//!
//! # Architecture
//!
//! ```text
//! IntentStore ─► AlertSender ─► [bounded queue] ─► AlertNotifier ─► TelegramClient
//!                                                        │
//!                                             dedup fingerprints (KV)
//! ```

pub mod dispatcher;
pub mod render;
pub mod telegram;

pub use dispatcher::{
    AlertDispatcher, AlertNotifier, AlertSender, AlertWorker, RetryPolicy, ALERTS_SENT_KEY,
};
pub use render::{explorer_tx_url, format_cents, render_alert, RenderOptions};
pub use telegram::TelegramClient;

use crate::intent::{IntentStatus, TransferIntent};

/// Something an operator should hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertEvent {
    /// A new intent was stored
    RequestCreated { intent: TransferIntent },
    /// An intent moved from `previous` to its current status
    StatusChanged {
        intent: TransferIntent,
        previous: IntentStatus,
    },
}

impl AlertEvent {
    /// Intent snapshot carried by the event
    pub fn intent(&self) -> &TransferIntent {
        match self {
            AlertEvent::RequestCreated { intent } | AlertEvent::StatusChanged { intent, .. } => {
                intent
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AlertEvent::RequestCreated { .. } => "request_created",
            AlertEvent::StatusChanged { .. } => "status_changed",
        }
    }

    /// Identity used to suppress duplicate deliveries
    ///
    /// A status change is keyed on the transition and the update time, so an
    /// intent that cycles through the same statuses (retry after failure)
    /// still alerts on every change.
    pub fn fingerprint(&self) -> String {
        match self {
            AlertEvent::RequestCreated { intent } => {
                format!("{}:{}:{}", intent.id, self.kind(), intent.status)
            }
            AlertEvent::StatusChanged { intent, previous } => format!(
                "{}:{}:{}->{}:{}",
                intent.id,
                self.kind(),
                previous,
                intent.status,
                intent.updated_at.timestamp_micros()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::intent::{IntentDraft, IntentSource, RequestedBy};
    use crate::policy::{PolicyEngine, PolicyRequest};

    #[test]
    fn test_fingerprint_includes_transition() {
        let to = "0x00000000000000000000000000000000000000aa";
        let policy = PolicyEngine::new(PolicyConfig::default()).evaluate(&PolicyRequest {
            to_address: to.into(),
            amount_cents: 50,
            balance_cents: 10_000,
            spent_last_24h_cents: 0,
        });
        let mut intent = TransferIntent::new(
            IntentDraft {
                requested_by: RequestedBy::Human,
                source: IntentSource::Cli,
                to_address: to.into(),
                amount_cents: 50,
                reason: None,
                child_id: None,
            },
            policy,
        )
        .unwrap();

        let created = AlertEvent::RequestCreated {
            intent: intent.clone(),
        };
        assert_eq!(
            created.fingerprint(),
            format!("{}:request_created:pending_approval", intent.id)
        );

        intent.status = IntentStatus::Approved;
        let changed = AlertEvent::StatusChanged {
            intent,
            previous: IntentStatus::PendingApproval,
        };
        assert!(changed
            .fingerprint()
            .contains(":status_changed:pending_approval->approved:"));
        assert_ne!(created.fingerprint(), changed.fingerprint());
    }
}
