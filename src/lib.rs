//! Transfer Guard Library
//!
//! Guardrails for outbound fund transfers requested by an autonomous agent:
//! policy decisions, a durable intent lifecycle, multi-backend execution and
//! operator alerts.

pub mod alerts;
pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod guard;
pub mod intent;
pub mod policy;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use guard::{TransferGuard, TransferOutcome, TransferRequest};
pub use intent::{IntentStatus, TransferIntent};
pub use policy::{PolicyDecision, PolicyEngine};
