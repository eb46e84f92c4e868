//! Durable intent store
//!
//! All intents live in one JSON document under [`INTENTS_KEY`]. Mutations are
//! read-modify-write cycles over that document, serialized in-process by an
//! async mutex and committed with a conditional write, so a writer sharing
//! the same storage is detected and retried instead of silently clobbered.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::alerts::{AlertEvent, AlertSender};
use crate::error::{Error, Result};

use super::kv::KeyValueStore;
use super::types::{
    ApprovalRecord, ExecutionRecord, IntentStatus, RejectionRecord, TransferIntent,
};

/// Storage key for the intent document
pub const INTENTS_KEY: &str = "transfer_intents";

/// Intents retained before the oldest appended are dropped
pub const MAX_INTENTS: usize = 2000;

/// Default page size for [`IntentStore::list`]
pub const DEFAULT_LIST_LIMIT: usize = 100;

const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Persisted document, oldest-appended first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IntentDocument {
    version: u64,
    intents: Vec<TransferIntent>,
}

impl IntentDocument {
    /// Parse a stored blob, degrading to empty on corruption
    fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };

        if let Ok(doc) = serde_json::from_str::<IntentDocument>(raw) {
            return doc;
        }

        // Bare list written before versioning
        if let Ok(intents) = serde_json::from_str::<Vec<TransferIntent>>(raw) {
            return Self {
                version: 0,
                intents,
            };
        }

        warn!("Stored transfer intents are unreadable, treating store as empty");
        Self::default()
    }
}

/// Transfer intent store
pub struct IntentStore {
    kv: Arc<dyn KeyValueStore>,
    alerts: AlertSender,
    capacity: usize,
    write_lock: Mutex<()>,
}

impl IntentStore {
    /// Create a new intent store
    pub fn new(kv: Arc<dyn KeyValueStore>, alerts: AlertSender) -> Self {
        Self::with_capacity(kv, alerts, MAX_INTENTS)
    }

    /// Create a store retaining at most `capacity` intents
    pub fn with_capacity(kv: Arc<dyn KeyValueStore>, alerts: AlertSender, capacity: usize) -> Self {
        Self {
            kv,
            alerts,
            capacity: capacity.max(1),
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<IntentDocument> {
        let raw = self.kv.get(INTENTS_KEY).await?;
        Ok(IntentDocument::parse(raw.as_deref()))
    }

    /// Run `apply` against a fresh copy of the document and persist it
    ///
    /// `apply` returning `Ok(None)` or an error leaves storage untouched. The
    /// write only lands if the stored blob is still the one that was read;
    /// otherwise the whole cycle is retried from a fresh read.
    async fn mutate<T, F>(&self, mut apply: F) -> Result<Option<T>>
    where
        T: Send,
        F: FnMut(&mut Vec<TransferIntent>) -> Result<Option<T>> + Send,
    {
        let _guard = self.write_lock.lock().await;

        let mut attempt = 0;
        loop {
            attempt += 1;

            let raw = self.kv.get(INTENTS_KEY).await?;
            let mut doc = IntentDocument::parse(raw.as_deref());
            let expected = doc.version;

            let Some(output) = apply(&mut doc.intents)? else {
                return Ok(None);
            };

            doc.version = expected + 1;
            let json = serde_json::to_string(&doc)?;
            if self.kv.set_if(INTENTS_KEY, raw.as_deref(), json).await? {
                debug!("Persisted {} intents (v{})", doc.intents.len(), doc.version);
                return Ok(Some(output));
            }

            let found = self.load().await?.version;
            if attempt >= MAX_WRITE_ATTEMPTS {
                return Err(Error::ConcurrentModification {
                    key: INTENTS_KEY.to_string(),
                    expected,
                    found,
                });
            }
            warn!(
                "Intent store changed underneath us (v{} -> v{}), retrying",
                expected, found
            );
        }
    }

    /// Insert an intent, replacing any existing intent with the same id
    pub async fn append(&self, intent: TransferIntent) -> Result<TransferIntent> {
        let stored = self
            .mutate(|intents| {
                match intents.iter_mut().find(|i| i.id == intent.id) {
                    Some(existing) => *existing = intent.clone(),
                    None => intents.push(intent.clone()),
                }

                if intents.len() > self.capacity {
                    let overflow = intents.len() - self.capacity;
                    intents.drain(..overflow);
                    debug!("Evicted {} oldest intents", overflow);
                }

                Ok(Some(intent.clone()))
            })
            .await?;
        let stored = stored.unwrap_or(intent);

        info!(
            "Transfer intent {} created: {} cents to {} ({})",
            stored.id, stored.amount_cents, stored.to_address, stored.status
        );

        self.alerts.notify(AlertEvent::RequestCreated {
            intent: stored.clone(),
        });

        Ok(stored)
    }

    /// List intents newest first, optionally filtered by status
    ///
    /// `limit` is clamped to at least one.
    pub async fn list(
        &self,
        status: Option<IntentStatus>,
        limit: usize,
    ) -> Result<Vec<TransferIntent>> {
        let mut intents: Vec<TransferIntent> = self
            .load()
            .await?
            .intents
            .into_iter()
            .filter(|i| status.map_or(true, |s| i.status == s))
            .collect();

        intents.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        intents.truncate(limit.max(1));

        Ok(intents)
    }

    /// Look up an intent by id
    pub async fn get_by_id(&self, id: &str) -> Result<Option<TransferIntent>> {
        Ok(self.load().await?.intents.into_iter().find(|i| i.id == id))
    }

    /// Apply `mutator` to one intent and persist
    ///
    /// Returns `Ok(None)` when no intent has this id. A status change emits a
    /// `status_changed` alert carrying the previous status.
    pub async fn update<F>(&self, id: &str, mut mutator: F) -> Result<Option<TransferIntent>>
    where
        F: FnMut(&mut TransferIntent) -> Result<()> + Send,
    {
        let outcome = self
            .mutate(|intents| {
                let Some(intent) = intents.iter_mut().find(|i| i.id == id) else {
                    return Ok(None);
                };

                let previous = intent.status;
                mutator(intent)?;
                intent.updated_at = Utc::now();

                Ok(Some((intent.clone(), previous)))
            })
            .await?;

        let Some((intent, previous)) = outcome else {
            debug!("Transfer intent {} not found for update", id);
            return Ok(None);
        };

        if intent.status != previous {
            info!(
                "Transfer intent {} status: {} -> {}",
                intent.id, previous, intent.status
            );
            self.alerts.notify(AlertEvent::StatusChanged {
                intent: intent.clone(),
                previous,
            });
        }

        Ok(Some(intent))
    }

    /// Record an approval
    ///
    /// Submitted or executed intents keep their status. Rejected intents
    /// cannot be approved.
    pub async fn approve(
        &self,
        id: &str,
        approved_by: &str,
        note: Option<&str>,
    ) -> Result<Option<TransferIntent>> {
        self.update(id, |intent| {
            if intent.status == IntentStatus::Rejected {
                return Err(Error::IntentFinalized {
                    id: intent.id.clone(),
                    status: intent.status,
                });
            }

            intent.approvals.push(ApprovalRecord {
                approved_by: approved_by.to_string(),
                note: note.map(str::to_string),
                at: Utc::now(),
            });

            if !intent.status.is_settled() {
                intent.status = IntentStatus::Approved;
            }
            Ok(())
        })
        .await
    }

    /// Reject an intent, overwriting any earlier rejection
    pub async fn reject(
        &self,
        id: &str,
        rejection: RejectionRecord,
    ) -> Result<Option<TransferIntent>> {
        self.update(id, |intent| {
            if intent.status.is_settled() {
                return Err(Error::IntentFinalized {
                    id: intent.id.clone(),
                    status: intent.status,
                });
            }

            intent.status = IntentStatus::Rejected;
            intent.rejection = Some(rejection.clone());
            Ok(())
        })
        .await
    }

    /// Record the outcome of an execution attempt
    pub async fn set_execution(
        &self,
        id: &str,
        status: IntentStatus,
        record: ExecutionRecord,
    ) -> Result<Option<TransferIntent>> {
        if !status.is_execution_outcome() {
            return Err(Error::Internal(format!(
                "{} is not an execution outcome",
                status
            )));
        }

        self.update(id, |intent| {
            intent.status = status;
            intent.execution = Some(record.clone());
            Ok(())
        })
        .await
    }

    /// Spend counted against the daily limit
    ///
    /// Sums submitted and executed intents created within the trailing 24
    /// hours. The window follows creation time, not execution time.
    pub async fn sum_spend_last_24h(&self) -> Result<i64> {
        self.sum_spend_as_of(Utc::now()).await
    }

    /// [`Self::sum_spend_last_24h`] evaluated at `now`
    pub async fn sum_spend_as_of(&self, now: DateTime<Utc>) -> Result<i64> {
        let cutoff = now - Duration::hours(24);

        Ok(self
            .load()
            .await?
            .intents
            .iter()
            .filter(|i| i.status.is_settled() && i.created_at >= cutoff && i.created_at <= now)
            .map(|i| i.amount_cents)
            .sum())
    }
}
