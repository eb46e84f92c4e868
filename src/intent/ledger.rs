//! Transaction ledger
//!
//! One entry per successful execution attempt, newest last.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::BackendKind;
use crate::error::Result;

use super::kv::KeyValueStore;
use super::types::TransferIntent;

/// Storage key for ledger entries
pub const LEDGER_KEY: &str = "transfer_ledger";

/// Entries retained before the oldest are dropped
pub const MAX_LEDGER_ENTRIES: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    TransferOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: String,
    pub kind: LedgerKind,
    pub amount_cents: i64,
    pub to_address: String,
    pub intent_id: String,
    pub backend: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_ref: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Outbound transfer entry for an executed intent
    pub fn transfer_out(
        intent: &TransferIntent,
        backend: BackendKind,
        transaction_ref: Option<String>,
    ) -> Self {
        let description = match &intent.reason {
            Some(reason) => format!(
                "Transfer to {} via {}: {}",
                intent.to_address, backend, reason
            ),
            None => format!("Transfer to {} via {}", intent.to_address, backend),
        };

        Self {
            id: Uuid::new_v4().to_string(),
            kind: LedgerKind::TransferOut,
            amount_cents: intent.amount_cents,
            to_address: intent.to_address.clone(),
            intent_id: intent.id.clone(),
            backend,
            transaction_ref,
            description,
            created_at: Utc::now(),
        }
    }
}

/// Append-only ledger over the key-value store
pub struct TransactionLedger {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl TransactionLedger {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<LedgerEntry>> {
        let Some(raw) = self.kv.get(LEDGER_KEY).await? else {
            return Ok(Vec::new());
        };

        Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Ledger is unreadable ({}), starting a fresh one", e);
            Vec::new()
        }))
    }

    /// Append an entry
    pub async fn append(&self, entry: LedgerEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.load().await?;
        debug!(
            "Ledger: {} cents to {} (intent {})",
            entry.amount_cents, entry.to_address, entry.intent_id
        );
        entries.push(entry);

        if entries.len() > MAX_LEDGER_ENTRIES {
            let overflow = entries.len() - MAX_LEDGER_ENTRIES;
            entries.drain(..overflow);
        }

        self.kv
            .set(LEDGER_KEY, serde_json::to_string(&entries)?)
            .await
    }

    /// Most recent entries, newest first
    pub async fn recent(&self, limit: usize) -> Result<Vec<LedgerEntry>> {
        Ok(self.load().await?.into_iter().rev().take(limit).collect())
    }

    /// Entries recorded for one intent
    pub async fn for_intent(&self, intent_id: &str) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .filter(|e| e.intent_id == intent_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyConfig;
    use crate::intent::kv::MemoryKv;
    use crate::intent::types::{IntentDraft, IntentSource, RequestedBy};
    use crate::policy::{PolicyEngine, PolicyRequest};

    fn intent() -> TransferIntent {
        let policy = PolicyEngine::new(PolicyConfig::default()).evaluate(&PolicyRequest {
            to_address: "0x00000000000000000000000000000000000000aa".into(),
            amount_cents: 50,
            balance_cents: 10_000,
            spent_last_24h_cents: 0,
        });
        TransferIntent::new(
            IntentDraft {
                requested_by: RequestedBy::Agent,
                source: IntentSource::FundChild,
                to_address: "0x00000000000000000000000000000000000000aa".into(),
                amount_cents: 50,
                reason: Some("seed child".into()),
                child_id: Some("child-1".into()),
            },
            policy,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_append_and_query() {
        let ledger = TransactionLedger::new(Arc::new(MemoryKv::new()));
        let intent = intent();

        ledger
            .append(LedgerEntry::transfer_out(&intent, BackendKind::Conway, Some("t-1".into())))
            .await
            .unwrap();
        ledger
            .append(LedgerEntry::transfer_out(&intent, BackendKind::Conway, Some("t-2".into())))
            .await
            .unwrap();

        let recent = ledger.recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].transaction_ref.as_deref(), Some("t-2"));
        assert!(recent[0].description.contains("seed child"));

        assert_eq!(ledger.for_intent(&intent.id).await.unwrap().len(), 2);
        assert!(ledger.for_intent("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_ledger_starts_fresh() {
        let kv = Arc::new(MemoryKv::new());
        kv.set(LEDGER_KEY, "nope".into()).await.unwrap();
        let ledger = TransactionLedger::new(kv);

        assert!(ledger.recent(10).await.unwrap().is_empty());
        ledger
            .append(LedgerEntry::transfer_out(&intent(), BackendKind::Vultisig, None))
            .await
            .unwrap();
        assert_eq!(ledger.recent(10).await.unwrap().len(), 1);
    }
}
