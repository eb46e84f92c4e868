//! Transfer policy engine
//!
//! Evaluates a transfer request against hard limits and the recipient
//! allowlist. Rules only ever escalate severity: once a request is rejected
//! no later rule can soften it, and `require_human` never overrides `reject`.
//!
//! The engine is pure: no I/O, no clock reads besides the evaluation stamp.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PolicyConfig;

/// Verdict for a transfer request, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    /// May execute unattended
    AutoApprove,
    /// Needs a human decision before execution
    RequireHuman,
    /// Must not execute
    Reject,
}

impl std::fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyDecision::AutoApprove => write!(f, "auto_approve"),
            PolicyDecision::RequireHuman => write!(f, "require_human"),
            PolicyDecision::Reject => write!(f, "reject"),
        }
    }
}

/// Why a decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyReason {
    PolicyDisabled,
    NonPositiveAmount,
    AboveHardPerTransferLimit,
    BelowMinReserve,
    AboveHardDailyLimit,
    RecipientNotAllowlisted,
    AboveAutoApproveThreshold,
}

impl PolicyReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            PolicyReason::PolicyDisabled => "policy_disabled",
            PolicyReason::NonPositiveAmount => "non_positive_amount",
            PolicyReason::AboveHardPerTransferLimit => "above_hard_per_transfer_limit",
            PolicyReason::BelowMinReserve => "below_min_reserve",
            PolicyReason::AboveHardDailyLimit => "above_hard_daily_limit",
            PolicyReason::RecipientNotAllowlisted => "recipient_not_allowlisted",
            PolicyReason::AboveAutoApproveThreshold => "above_auto_approve_threshold",
        }
    }
}

impl std::fmt::Display for PolicyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Inputs to a single evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRequest {
    pub to_address: String,
    pub amount_cents: i64,
    pub balance_cents: i64,
    pub spent_last_24h_cents: i64,
}

/// Inputs and thresholds used for a decision, kept for audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySnapshot {
    pub to_address: String,
    pub amount_cents: i64,
    pub balance_cents: i64,
    pub spent_last_24h_cents: i64,
    pub enabled: bool,
    pub require_allowlist: bool,
    pub allowlisted: bool,
    pub min_reserve_cents: i64,
    pub auto_approve_max_cents: i64,
    pub hard_per_transfer_cents: i64,
    pub hard_daily_limit_cents: i64,
}

/// Result of an evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEvaluation {
    pub decision: PolicyDecision,
    pub reasons: Vec<PolicyReason>,
    pub snapshot: PolicySnapshot,
    pub evaluated_at: DateTime<Utc>,
}

impl PolicyEvaluation {
    /// Comma-separated reason codes
    pub fn reason_codes(&self) -> String {
        self.reasons
            .iter()
            .map(PolicyReason::code)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Policy engine holding the thresholds read at construction
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    config: PolicyConfig,
    allowlist: HashSet<String>,
}

impl PolicyEngine {
    /// Create a new policy engine
    pub fn new(config: PolicyConfig) -> Self {
        let allowlist = config
            .allowlist
            .iter()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect();

        Self { config, allowlist }
    }

    /// Check if a recipient is allowlisted
    pub fn is_allowlisted(&self, address: &str) -> bool {
        self.allowlist.contains(&address.trim().to_lowercase())
    }

    /// Evaluate a transfer request
    pub fn evaluate(&self, request: &PolicyRequest) -> PolicyEvaluation {
        let config = &self.config;
        let allowlisted = self.is_allowlisted(&request.to_address);

        let snapshot = PolicySnapshot {
            to_address: request.to_address.clone(),
            amount_cents: request.amount_cents,
            balance_cents: request.balance_cents,
            spent_last_24h_cents: request.spent_last_24h_cents,
            enabled: config.enabled,
            require_allowlist: config.require_allowlist,
            allowlisted,
            min_reserve_cents: config.min_reserve_cents,
            auto_approve_max_cents: config.auto_approve_max_cents,
            hard_per_transfer_cents: config.hard_per_transfer_cents,
            hard_daily_limit_cents: config.hard_daily_limit_cents,
        };

        if !config.enabled {
            return PolicyEvaluation {
                decision: PolicyDecision::AutoApprove,
                reasons: vec![PolicyReason::PolicyDisabled],
                snapshot,
                evaluated_at: Utc::now(),
            };
        }

        let mut verdict = Verdict::default();
        let amount = request.amount_cents;

        if amount <= 0 {
            verdict.reject(PolicyReason::NonPositiveAmount);
        }

        if amount > config.hard_per_transfer_cents {
            verdict.reject(PolicyReason::AboveHardPerTransferLimit);
        }

        if request.balance_cents.saturating_sub(amount) < config.min_reserve_cents {
            verdict.reject(PolicyReason::BelowMinReserve);
        }

        if request.spent_last_24h_cents.saturating_add(amount) > config.hard_daily_limit_cents {
            verdict.escalate(PolicyReason::AboveHardDailyLimit);
        }

        if config.require_allowlist && !allowlisted {
            verdict.escalate(PolicyReason::RecipientNotAllowlisted);
        }

        if verdict.decision == PolicyDecision::AutoApprove && amount > config.auto_approve_max_cents
        {
            verdict.escalate(PolicyReason::AboveAutoApproveThreshold);
        }

        let evaluation = PolicyEvaluation {
            decision: verdict.decision,
            reasons: verdict.reasons,
            snapshot,
            evaluated_at: Utc::now(),
        };

        debug!(
            "Policy evaluated: {} cents to {} -> {} [{}]",
            amount,
            request.to_address,
            evaluation.decision,
            evaluation.reason_codes()
        );

        evaluation
    }
}

/// Accumulates reasons while only ever raising severity
struct Verdict {
    decision: PolicyDecision,
    reasons: Vec<PolicyReason>,
}

impl Default for Verdict {
    fn default() -> Self {
        Self {
            decision: PolicyDecision::AutoApprove,
            reasons: Vec::new(),
        }
    }
}

impl Verdict {
    fn reject(&mut self, reason: PolicyReason) {
        self.decision = PolicyDecision::Reject;
        self.reasons.push(reason);
    }

    fn escalate(&mut self, reason: PolicyReason) {
        self.decision = self.decision.max(PolicyDecision::RequireHuman);
        self.reasons.push(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPIENT: &str = "0x00000000000000000000000000000000000000aa";

    fn test_config() -> PolicyConfig {
        PolicyConfig {
            enabled: true,
            require_allowlist: true,
            allowlist: vec![RECIPIENT.to_uppercase().replace("0X", "0x")],
            min_reserve_cents: 1_000,
            auto_approve_max_cents: 500,
            hard_per_transfer_cents: 5_000,
            hard_daily_limit_cents: 10_000,
        }
    }

    fn request(amount_cents: i64) -> PolicyRequest {
        PolicyRequest {
            to_address: RECIPIENT.to_string(),
            amount_cents,
            balance_cents: 100_000,
            spent_last_24h_cents: 0,
        }
    }

    #[test]
    fn test_auto_approve_within_limits() {
        let engine = PolicyEngine::new(test_config());
        let result = engine.evaluate(&request(100));
        assert_eq!(result.decision, PolicyDecision::AutoApprove);
        assert!(result.reasons.is_empty());
        assert!(result.snapshot.allowlisted);
    }

    #[test]
    fn test_policy_disabled_short_circuits() {
        let mut config = test_config();
        config.enabled = false;
        let engine = PolicyEngine::new(config);

        let result = engine.evaluate(&request(-5));
        assert_eq!(result.decision, PolicyDecision::AutoApprove);
        assert_eq!(result.reasons, vec![PolicyReason::PolicyDisabled]);
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let engine = PolicyEngine::new(test_config());
        for amount in [0, -1] {
            let result = engine.evaluate(&request(amount));
            assert_eq!(result.decision, PolicyDecision::Reject);
            assert!(result.reasons.contains(&PolicyReason::NonPositiveAmount));
        }
    }

    #[test]
    fn test_reason_codes_follow_check_order() {
        let engine = PolicyEngine::new(test_config());
        let result = engine.evaluate(&PolicyRequest {
            to_address: "0x00000000000000000000000000000000000000bb".into(),
            amount_cents: 600,
            balance_cents: 100_000,
            spent_last_24h_cents: 0,
        });
        assert_eq!(result.decision, PolicyDecision::RequireHuman);
        assert_eq!(result.reason_codes(), "recipient_not_allowlisted");

        let result = engine.evaluate(&PolicyRequest {
            amount_cents: 0,
            balance_cents: 500,
            ..request(0)
        });
        assert_eq!(result.reason_codes(), "non_positive_amount, below_min_reserve");
    }

    #[test]
    fn test_hard_per_transfer_always_rejects() {
        let engine = PolicyEngine::new(test_config());

        // Other inputs vary, verdict never moves off reject
        for (balance, spent, to) in [
            (1_000_000, 0, RECIPIENT),
            (0, 50_000, "0x00000000000000000000000000000000000000bb"),
            (10_000, 9_999, RECIPIENT),
        ] {
            let result = engine.evaluate(&PolicyRequest {
                to_address: to.to_string(),
                amount_cents: 5_001,
                balance_cents: balance,
                spent_last_24h_cents: spent,
            });
            assert_eq!(result.decision, PolicyDecision::Reject);
            assert!(result
                .reasons
                .contains(&PolicyReason::AboveHardPerTransferLimit));
        }
    }

    #[test]
    fn test_min_reserve_rejects() {
        let engine = PolicyEngine::new(test_config());
        let result = engine.evaluate(&PolicyRequest {
            balance_cents: 1_050,
            ..request(100)
        });
        assert_eq!(result.decision, PolicyDecision::Reject);
        assert_eq!(result.reasons, vec![PolicyReason::BelowMinReserve]);
    }

    #[test]
    fn test_daily_limit_requires_human() {
        let engine = PolicyEngine::new(test_config());
        let result = engine.evaluate(&PolicyRequest {
            spent_last_24h_cents: 9_950,
            ..request(100)
        });
        assert_eq!(result.decision, PolicyDecision::RequireHuman);
        assert_eq!(result.reasons, vec![PolicyReason::AboveHardDailyLimit]);
    }

    #[test]
    fn test_reject_not_downgraded_by_later_rules() {
        let engine = PolicyEngine::new(test_config());
        let result = engine.evaluate(&PolicyRequest {
            to_address: "0x00000000000000000000000000000000000000bb".into(),
            amount_cents: 6_000,
            balance_cents: 6_500,
            spent_last_24h_cents: 9_000,
        });
        assert_eq!(result.decision, PolicyDecision::Reject);
        assert_eq!(
            result.reasons,
            vec![
                PolicyReason::AboveHardPerTransferLimit,
                PolicyReason::BelowMinReserve,
                PolicyReason::AboveHardDailyLimit,
                PolicyReason::RecipientNotAllowlisted,
            ]
        );
    }

    #[test]
    fn test_recipient_not_allowlisted_never_auto_approves() {
        let engine = PolicyEngine::new(test_config());
        for amount in [1, 50, 500, 4_000] {
            let result = engine.evaluate(&PolicyRequest {
                to_address: "0x00000000000000000000000000000000000000cc".into(),
                ..request(amount)
            });
            assert_ne!(result.decision, PolicyDecision::AutoApprove);
            assert!(result
                .reasons
                .contains(&PolicyReason::RecipientNotAllowlisted));
        }
    }

    #[test]
    fn test_allowlist_case_insensitive() {
        let engine = PolicyEngine::new(test_config());
        assert!(engine.is_allowlisted(&RECIPIENT.to_uppercase().replace("0X", "0x")));
        assert!(engine.is_allowlisted(RECIPIENT));
    }

    #[test]
    fn test_empty_required_allowlist_requires_human() {
        let mut config = test_config();
        config.allowlist.clear();
        let engine = PolicyEngine::new(config);

        let result = engine.evaluate(&request(50));
        assert_eq!(result.decision, PolicyDecision::RequireHuman);
        assert_eq!(result.reasons, vec![PolicyReason::RecipientNotAllowlisted]);
    }

    #[test]
    fn test_above_auto_approve_threshold() {
        let engine = PolicyEngine::new(test_config());
        let result = engine.evaluate(&request(501));
        assert_eq!(result.decision, PolicyDecision::RequireHuman);
        assert_eq!(result.reasons, vec![PolicyReason::AboveAutoApproveThreshold]);
    }

    #[test]
    fn test_threshold_reason_not_added_when_already_escalated() {
        let mut config = test_config();
        config.allowlist.clear();
        let engine = PolicyEngine::new(config);

        let result = engine.evaluate(&request(900));
        assert_eq!(result.decision, PolicyDecision::RequireHuman);
        assert_eq!(result.reasons, vec![PolicyReason::RecipientNotAllowlisted]);
    }

    #[test]
    fn test_snapshot_records_thresholds() {
        let engine = PolicyEngine::new(test_config());
        let result = engine.evaluate(&request(100));
        assert_eq!(result.snapshot.hard_per_transfer_cents, 5_000);
        assert_eq!(result.snapshot.balance_cents, 100_000);

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"decision\":\"auto_approve\""));
        assert!(json.contains("\"hardPerTransferCents\":5000"));
    }
}
