//! Transfer Guard - approval and execution guardrails for agent transfers
//!
//! # WARNING
//! - Approving or executing an intent moves real funds.
//! - Executions are not deduplicated. Check `show` before re-running `execute`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use transfer_guard::cli::commands;
use transfer_guard::config::Config;

/// Transfer Guard - policy, approval and execution of outbound transfers
#[derive(Parser)]
#[command(name = "transfer-guard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON
    #[arg(long, env = "GUARD_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Request a transfer (evaluated by policy)
    Request {
        /// Destination address (0x + 40 hex)
        to: String,

        /// Amount in cents
        amount_cents: i64,

        /// Why the transfer is needed (required when approval is needed)
        #[arg(long)]
        reason: Option<String>,

        /// Child this transfer funds
        #[arg(long)]
        child_id: Option<String>,
    },

    /// List transfer intents
    List {
        /// Filter by status (pending_approval, approved, rejected, submitted, executed, failed)
        #[arg(long)]
        status: Option<String>,

        /// Number of intents to show
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Show one transfer intent
    Show {
        /// Intent ID
        id: String,
    },

    /// Approve a pending intent
    Approve {
        /// Intent ID
        id: String,

        /// Approver name
        #[arg(long, default_value = "operator")]
        by: String,

        /// Note stored with the approval
        #[arg(long)]
        note: Option<String>,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Reject an intent
    Reject {
        /// Intent ID
        id: String,

        /// Rejection reason
        #[arg(long, default_value = "rejected by operator")]
        reason: String,

        /// Rejecter name
        #[arg(long, default_value = "operator")]
        by: String,
    },

    /// Execute an approved intent
    Execute {
        /// Intent ID
        id: String,

        /// Executor name
        #[arg(long, default_value = "operator")]
        by: String,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Show trailing 24h spend and recent transfers
    Spend {
        /// Number of ledger entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("transfer_guard=info".parse()?);
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .init();
    }

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Request {
            to,
            amount_cents,
            reason,
            child_id,
        } => commands::request(&config, &to, amount_cents, reason, child_id).await,
        Commands::List { status, limit } => commands::list(&config, status.as_deref(), limit).await,
        Commands::Show { id } => commands::show(&config, &id).await,
        Commands::Approve { id, by, note, yes } => {
            commands::approve(&config, &id, &by, note.as_deref(), yes).await
        }
        Commands::Reject { id, reason, by } => commands::reject(&config, &id, &by, &reason).await,
        Commands::Execute { id, by, yes } => commands::execute(&config, &id, &by, yes).await,
        Commands::Spend { limit } => commands::spend(&config, limit).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
