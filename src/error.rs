//! Error types for the transfer guard

use thiserror::Error;

use crate::intent::IntentStatus;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the transfer guard
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // Intent lifecycle errors
    #[error("Transfer intent not found: {0}")]
    IntentNotFound(String),

    #[error("Transfer intent {id} is {status}, expected approved")]
    IntentNotApproved { id: String, status: IntentStatus },

    #[error("Transfer intent {id} is {status} and cannot be changed")]
    IntentFinalized { id: String, status: IntentStatus },

    // Persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Concurrent modification of {key}: expected version {expected}, found {found}")]
    ConcurrentModification {
        key: String,
        expected: u64,
        found: u64,
    },

    // Backend errors
    #[error("Platform transfer failed: {0}")]
    PlatformTransfer(String),

    #[error("Vultisig broker failed: {0}")]
    Broker(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    // Alert errors
    #[error("Alert delivery failed: {0}")]
    Alert(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::Timeout(_) | Error::ConcurrentModification { .. }
        )
    }

    /// Check if this error is a violated precondition rather than a backend failure
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::IntentNotFound(_)
                | Error::IntentNotApproved { .. }
                | Error::IntentFinalized { .. }
                | Error::InvalidAddress(_)
        )
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}
