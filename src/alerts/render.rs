//! Alert text rendering

use crate::intent::IntentStatus;

use super::AlertEvent;

/// Chat API message size limit
pub const MAX_ALERT_CHARS: usize = 4000;

/// Longest reason shown before truncation
pub const MAX_REASON_CHARS: usize = 280;

/// Built-in explorer templates by chain name
const EXPLORER_TEMPLATES: &[(&str, &str)] = &[
    ("base", "https://basescan.org/tx/{tx}"),
    ("base-sepolia", "https://sepolia.basescan.org/tx/{tx}"),
    ("ethereum", "https://etherscan.io/tx/{tx}"),
    ("mainnet", "https://etherscan.io/tx/{tx}"),
    ("sepolia", "https://sepolia.etherscan.io/tx/{tx}"),
    ("arbitrum", "https://arbiscan.io/tx/{tx}"),
    ("optimism", "https://optimistic.etherscan.io/tx/{tx}"),
    ("polygon", "https://polygonscan.com/tx/{tx}"),
];

/// Rendering options taken from the alert config
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub chain: String,
    pub explorer_tx_template: Option<String>,
}

/// Format cents as `$X.YY`
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}${}.{:02}", sign, abs / 100, abs % 100)
}

/// Block-explorer link for a transaction reference
///
/// An explicit template wins over the chain's built-in one. Unknown chains
/// without an override produce no link.
pub fn explorer_tx_url(chain: &str, template: Option<&str>, tx: &str) -> Option<String> {
    let template = template.filter(|t| !t.trim().is_empty()).or_else(|| {
        let chain = chain.trim().to_lowercase();
        EXPLORER_TEMPLATES
            .iter()
            .find(|(name, _)| *name == chain)
            .map(|(_, t)| *t)
    })?;

    Some(template.replace("{tx}", tx))
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// Render an alert as plain text
pub fn render_alert(event: &AlertEvent, options: &RenderOptions) -> String {
    let intent = event.intent();

    let headline = match event {
        AlertEvent::RequestCreated { .. } => "Transfer request created",
        AlertEvent::StatusChanged { .. } => "Transfer status changed",
    };

    let status_line = match event {
        AlertEvent::RequestCreated { intent } => format!("Status: {}", intent.status),
        AlertEvent::StatusChanged { intent, previous } => {
            format!("Status: {} -> {}", previous, intent.status)
        }
    };

    let mut lines = vec![
        format!("[transfer-guard] {}", headline),
        format!("ID: {}", intent.id),
        format!("Amount: {}", format_cents(intent.amount_cents)),
        format!("To: {}", intent.to_address),
        format!("Source: {}", intent.source),
        format!("Requested by: {}", intent.requested_by),
        status_line,
    ];

    if let Some(tx) = intent
        .execution
        .as_ref()
        .and_then(|e| e.transaction_ref.as_deref())
    {
        lines.push(format!("Tx: {}", tx));
        if let Some(url) =
            explorer_tx_url(&options.chain, options.explorer_tx_template.as_deref(), tx)
        {
            lines.push(format!("Explorer: {}", url));
        }
    }

    if let Some(child) = &intent.child_id {
        lines.push(format!("Child: {}", child));
    }

    if let Some(reason) = intent.reason.as_deref().filter(|r| !r.trim().is_empty()) {
        lines.push(format!("Reason: {}", truncate_chars(reason, MAX_REASON_CHARS)));
    }

    if let Some(execution) = &intent.execution {
        if intent.status == IntentStatus::Failed {
            lines.push(format!("Error: {}", truncate_chars(&execution.message, MAX_REASON_CHARS)));
        }
    }

    if intent.status == IntentStatus::PendingApproval {
        lines.push(format!(
            "Action: approve with `transfer-guard approve {id}` \
             or reject with `transfer-guard reject {id}`",
            id = intent.id
        ));
    }

    lines.push(format!("Time: {}", intent.updated_at.to_rfc3339()));

    truncate_chars(&lines.join("\n"), MAX_ALERT_CHARS)
}
