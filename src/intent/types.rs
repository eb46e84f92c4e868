//! Core types for transfer intents
//!
//! Defines the intent record, its lifecycle status, and the approval,
//! rejection and execution records attached to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BackendKind;
use crate::policy::{PolicyDecision, PolicyEvaluation};

/// Who asked for the transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedBy {
    Agent,
    Human,
}

impl std::fmt::Display for RequestedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestedBy::Agent => write!(f, "agent"),
            RequestedBy::Human => write!(f, "human"),
        }
    }
}

/// Where the request originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    /// Agent tool call moving credits
    TransferCredits,
    /// Funding a spawned child
    FundChild,
    /// Operator command line
    Cli,
    /// Internal housekeeping
    System,
}

impl std::fmt::Display for IntentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntentSource::TransferCredits => write!(f, "transfer_credits"),
            IntentSource::FundChild => write!(f, "fund_child"),
            IntentSource::Cli => write!(f, "cli"),
            IntentSource::System => write!(f, "system"),
        }
    }
}

/// Lifecycle status of an intent
///
/// ```text
/// pending_approval ──► approved ──► submitted | executed | failed
///        │
///        └──────────► rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    PendingApproval,
    Approved,
    Rejected,
    Submitted,
    Executed,
    Failed,
}

impl IntentStatus {
    /// Initial status for a policy decision, `None` when nothing may be queued
    pub fn initial_for(decision: PolicyDecision) -> Option<Self> {
        match decision {
            PolicyDecision::AutoApprove => Some(IntentStatus::Approved),
            PolicyDecision::RequireHuman => Some(IntentStatus::PendingApproval),
            PolicyDecision::Reject => None,
        }
    }

    /// Funds have left (or are leaving) through a backend
    pub fn is_settled(&self) -> bool {
        matches!(self, IntentStatus::Submitted | IntentStatus::Executed)
    }

    /// Statuses an execution attempt may record
    pub fn is_execution_outcome(&self) -> bool {
        matches!(
            self,
            IntentStatus::Submitted | IntentStatus::Executed | IntentStatus::Failed
        )
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntentStatus::PendingApproval => write!(f, "pending_approval"),
            IntentStatus::Approved => write!(f, "approved"),
            IntentStatus::Rejected => write!(f, "rejected"),
            IntentStatus::Submitted => write!(f, "submitted"),
            IntentStatus::Executed => write!(f, "executed"),
            IntentStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for IntentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending_approval" | "pending" => Ok(IntentStatus::PendingApproval),
            "approved" => Ok(IntentStatus::Approved),
            "rejected" => Ok(IntentStatus::Rejected),
            "submitted" => Ok(IntentStatus::Submitted),
            "executed" => Ok(IntentStatus::Executed),
            "failed" => Ok(IntentStatus::Failed),
            other => Err(format!("Unknown intent status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRecord {
    pub approved_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionRecord {
    pub rejected_by: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

impl RejectionRecord {
    pub fn new(rejected_by: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            rejected_by: rejected_by.into(),
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}

/// Outcome of an execution attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub backend: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_ref: Option<String>,
    pub message: String,
    pub executed_by: String,
    pub executed_at: DateTime<Utc>,
}

/// Caller-supplied fields for a new intent
#[derive(Debug, Clone)]
pub struct IntentDraft {
    pub requested_by: RequestedBy,
    pub source: IntentSource,
    pub to_address: String,
    pub amount_cents: i64,
    pub reason: Option<String>,
    pub child_id: Option<String>,
}

/// A proposed fund transfer and its approval/execution lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferIntent {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub requested_by: RequestedBy,
    pub source: IntentSource,
    pub to_address: String,
    pub amount_cents: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_id: Option<String>,
    pub status: IntentStatus,
    /// Decision frozen at creation, never recomputed
    pub policy: PolicyEvaluation,
    #[serde(default)]
    pub approvals: Vec<ApprovalRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<RejectionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionRecord>,
}

impl TransferIntent {
    /// Create an intent from a policy decision
    ///
    /// Returns `None` for rejected decisions, which are never queued.
    pub fn new(draft: IntentDraft, policy: PolicyEvaluation) -> Option<Self> {
        let status = IntentStatus::initial_for(policy.decision)?;
        let now = Utc::now();

        Some(Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            requested_by: draft.requested_by,
            source: draft.source,
            to_address: draft.to_address,
            amount_cents: draft.amount_cents,
            reason: draft.reason,
            child_id: draft.child_id,
            status,
            policy,
            approvals: Vec::new(),
            rejection: None,
            execution: None,
        })
    }
}
