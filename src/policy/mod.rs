//! Transfer policy
//!
//! Deterministic limits that decide whether an agent-initiated transfer may
//! run unattended, needs a human, or is blocked outright.

pub mod engine;

pub use engine::{
    PolicyDecision, PolicyEngine, PolicyEvaluation, PolicyReason, PolicyRequest, PolicySnapshot,
};
