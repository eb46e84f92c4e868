//! CLI command implementations

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dialoguer::Confirm;
use tracing::{info, warn};

use crate::alerts::{format_cents, AlertDispatcher, AlertWorker};
use crate::config::Config;
use crate::guard::{TransferGuard, TransferOutcome, TransferRequest};
use crate::intent::{
    IntentSource, IntentStatus, JsonFileKv, KeyValueStore, RequestedBy, TransferIntent,
};

/// How long to wait for queued alerts before exiting
const ALERT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Guard plus the alert worker that must be flushed on exit
struct Session {
    guard: TransferGuard,
    worker: AlertWorker,
}

impl Session {
    fn open(config: &Config) -> Result<Self> {
        let kv: Arc<dyn KeyValueStore> = Arc::new(JsonFileKv::new(config.storage.path.clone()));
        let (alerts, worker) = AlertDispatcher::spawn(&config.alerts, kv.clone());
        let guard = TransferGuard::from_config(config, kv, alerts)?;
        Ok(Self { guard, worker })
    }

    async fn close(self) {
        let Session { guard, worker } = self;
        // Dropping the guard drops the last alert sender so the worker can finish
        drop(guard);
        worker.drain(ALERT_FLUSH_TIMEOUT).await;
    }
}

fn short(value: &str, max: usize) -> String {
    if value.chars().count() > max {
        format!("{}...", value.chars().take(max).collect::<String>())
    } else {
        value.to_string()
    }
}

fn print_intent(intent: &TransferIntent) {
    println!("ID:           {}", intent.id);
    println!("Status:       {}", intent.status);
    println!("Amount:       {}", format_cents(intent.amount_cents));
    println!("To:           {}", intent.to_address);
    println!("Source:       {}", intent.source);
    println!("Requested by: {}", intent.requested_by);
    println!("Created:      {}", intent.created_at.to_rfc3339());
    println!("Updated:      {}", intent.updated_at.to_rfc3339());
    if let Some(reason) = &intent.reason {
        println!("Reason:       {}", reason);
    }
    if let Some(child) = &intent.child_id {
        println!("Child:        {}", child);
    }

    println!(
        "Policy:       {} [{}]",
        intent.policy.decision,
        intent.policy.reason_codes()
    );
    let snapshot = &intent.policy.snapshot;
    println!(
        "              balance {}, spent 24h {}, allowlisted {}",
        format_cents(snapshot.balance_cents),
        format_cents(snapshot.spent_last_24h_cents),
        snapshot.allowlisted
    );

    for approval in &intent.approvals {
        println!(
            "Approved:     by {} at {}{}",
            approval.approved_by,
            approval.at.to_rfc3339(),
            approval
                .note
                .as_deref()
                .map(|n| format!(" ({})", n))
                .unwrap_or_default()
        );
    }
    if let Some(rejection) = &intent.rejection {
        println!(
            "Rejected:     by {} at {}: {}",
            rejection.rejected_by,
            rejection.at.to_rfc3339(),
            rejection.reason
        );
    }
    if let Some(execution) = &intent.execution {
        println!(
            "Execution:    {} by {} at {}",
            execution.backend,
            execution.executed_by,
            execution.executed_at.to_rfc3339()
        );
        println!("              {}", execution.message);
        if let Some(tx) = &execution.transaction_ref {
            println!("              ref {}", tx);
        }
    }
}

/// Submit a transfer request as an operator
pub async fn request(
    config: &Config,
    to: &str,
    amount_cents: i64,
    reason: Option<String>,
    child_id: Option<String>,
) -> Result<()> {
    let session = Session::open(config)?;

    let request = TransferRequest {
        to_address: to.to_string(),
        amount_cents,
        reason,
        requested_by: RequestedBy::Human,
        source: IntentSource::Cli,
        child_id,
    };

    let outcome = session.guard.request_transfer(request).await;
    session.close().await;
    let outcome = outcome?;

    println!("\n=== TRANSFER REQUEST ===\n");
    println!("{}\n", outcome.message());

    match &outcome {
        TransferOutcome::Blocked { evaluation, .. } => {
            println!("Decision: {}", evaluation.decision);
            println!("Reasons:  {}", evaluation.reason_codes());
        }
        _ => {
            if let Some(intent) = outcome.intent() {
                print_intent(intent);
            }
        }
    }

    println!();
    Ok(())
}

/// List stored intents
pub async fn list(config: &Config, status: Option<&str>, limit: usize) -> Result<()> {
    let status = status
        .map(|s| s.parse::<IntentStatus>())
        .transpose()
        .map_err(anyhow::Error::msg)?;

    let session = Session::open(config)?;
    let intents = session.guard.list(status, limit).await;
    session.close().await;
    let intents = intents?;

    println!("\n=== TRANSFER INTENTS ===\n");

    if intents.is_empty() {
        println!("No transfer intents found.");
        println!();
        return Ok(());
    }

    println!(
        "{:<38} {:<17} {:>10} {:<16} {:<20}",
        "ID", "STATUS", "AMOUNT", "TO", "CREATED"
    );
    println!("{}", "-".repeat(105));

    for intent in &intents {
        println!(
            "{:<38} {:<17} {:>10} {:<16} {:<20}",
            intent.id,
            intent.status.to_string(),
            format_cents(intent.amount_cents),
            short(&intent.to_address, 12),
            intent.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("\n{} intent(s)", intents.len());
    println!();
    Ok(())
}

/// Show one intent with its ledger entries
pub async fn show(config: &Config, id: &str) -> Result<()> {
    let session = Session::open(config)?;
    let intent = session.guard.get(id).await;
    let entries = session.guard.ledger_for(id).await;
    session.close().await;

    let Some(intent) = intent? else {
        anyhow::bail!("Transfer intent not found: {}", id);
    };

    println!("\n=== TRANSFER INTENT ===\n");
    print_intent(&intent);

    let entries = entries?;
    if !entries.is_empty() {
        println!("\nLedger:");
        for entry in entries {
            println!(
                "  {} {} {} via {}{}",
                entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                format_cents(entry.amount_cents),
                entry.to_address,
                entry.backend,
                entry
                    .transaction_ref
                    .map(|r| format!(" ({})", r))
                    .unwrap_or_default()
            );
        }
    }

    println!();
    Ok(())
}

/// Approve a pending intent
pub async fn approve(
    config: &Config,
    id: &str,
    approved_by: &str,
    note: Option<&str>,
    yes: bool,
) -> Result<()> {
    let session = Session::open(config)?;

    let Some(intent) = session.guard.get(id).await? else {
        session.close().await;
        anyhow::bail!("Transfer intent not found: {}", id);
    };

    if !yes {
        let action = if config.execution.auto_execute_on_approval {
            format!("Approve and send via {}", config.execution.backend)
        } else {
            "Approve".to_string()
        };
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "{} {} to {}? This cannot be undone.",
                action,
                format_cents(intent.amount_cents),
                intent.to_address
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            info!("Approval of {} cancelled by user", id);
            session.close().await;
            return Ok(());
        }
    }

    let result = session.guard.approve(id, approved_by, note).await;
    session.close().await;
    let intent = result?;

    println!("\n=== INTENT APPROVED ===\n");
    print_intent(&intent);
    println!();
    Ok(())
}

/// Reject an intent
pub async fn reject(config: &Config, id: &str, rejected_by: &str, reason: &str) -> Result<()> {
    let session = Session::open(config)?;
    let result = session.guard.reject(id, rejected_by, reason).await;
    session.close().await;
    let intent = result?;

    println!("\n=== INTENT REJECTED ===\n");
    print_intent(&intent);
    println!();
    Ok(())
}

/// Execute an approved intent
pub async fn execute(config: &Config, id: &str, executed_by: &str, yes: bool) -> Result<()> {
    let session = Session::open(config)?;

    if !yes {
        let Some(intent) = session.guard.get(id).await? else {
            session.close().await;
            anyhow::bail!("Transfer intent not found: {}", id);
        };

        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Send {} to {} via {}? This cannot be undone.",
                format_cents(intent.amount_cents),
                intent.to_address,
                session.guard.backend()
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            info!("Execution of {} cancelled by user", id);
            session.close().await;
            return Ok(());
        }
    }

    let result = session.guard.execute(id, executed_by).await;
    session.close().await;
    let intent = result?;

    println!("\n=== INTENT EXECUTED ===\n");
    print_intent(&intent);
    println!();
    Ok(())
}

/// Show trailing 24h spend against the daily limit
pub async fn spend(config: &Config, ledger_limit: usize) -> Result<()> {
    let session = Session::open(config)?;
    let spent = session.guard.spent_last_24h().await;
    let balance = session.guard.balance_cents().await;
    let ledger = session.guard.ledger(ledger_limit).await;
    session.close().await;

    let spent = spent?;
    let limit = config.policy.hard_daily_limit_cents;

    println!("\n=== TRANSFER SPEND ===\n");
    println!("Spent (24h):   {}", format_cents(spent));
    println!("Daily limit:   {}", format_cents(limit));
    println!("Remaining:     {}", format_cents((limit - spent).max(0)));
    match balance {
        Ok(balance) => println!("Balance:       {}", format_cents(balance)),
        Err(e) => {
            warn!("Balance lookup failed: {}", e);
            println!("Balance:       unavailable");
        }
    }

    let ledger = ledger?;
    if !ledger.is_empty() {
        println!("\nRecent transfers:");
        println!(
            "{:<20} {:>10} {:<16} {:<10} {:<38}",
            "DATE", "AMOUNT", "TO", "BACKEND", "INTENT"
        );
        println!("{}", "-".repeat(98));
        for entry in ledger {
            println!(
                "{:<20} {:>10} {:<16} {:<10} {:<38}",
                entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                format_cents(entry.amount_cents),
                short(&entry.to_address, 12),
                entry.backend.to_string(),
                entry.intent_id
            );
        }
    }

    println!();
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short() {
        assert_eq!(short("0x1234", 12), "0x1234");
        assert_eq!(short("0x0123456789abcdef", 6), "0x0123...");
    }
}
