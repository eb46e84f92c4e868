//! Transfer intents
//!
//! An intent is the durable record of one proposed transfer, from the policy
//! decision through human approval to execution.
//!
//! # Architecture
//!
//! ```text
//! KeyValueStore ─► IntentStore ─► AlertSender
//!        │
//!        └──────► TransactionLedger
//! ```

pub mod kv;
pub mod ledger;
pub mod store;
pub mod types;

pub use kv::{JsonFileKv, KeyValueStore, MemoryKv};
pub use ledger::{LedgerEntry, LedgerKind, TransactionLedger};
pub use store::{IntentStore, DEFAULT_LIST_LIMIT, MAX_INTENTS};
pub use types::{
    ApprovalRecord, ExecutionRecord, IntentDraft, IntentSource, IntentStatus, RejectionRecord,
    RequestedBy, TransferIntent,
};
