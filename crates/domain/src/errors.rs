//! Error types used throughout the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for MailVault
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum MailVaultError {
    /// The persisted document is malformed (invalid JSON or non-object root).
    #[error("Storage corruption: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A mutation hit a domain invariant (e.g. duplicate email).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The token endpoint rejected a credential exchange.
    #[error("Authentication error ({code}): {message}")]
    Auth { code: String, message: String },

    /// Persistent throttling after the retry budget was exhausted.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Transport-level failure (timeout, connection error, bad gateway body).
    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MailVaultError {
    /// Auth error without a structured provider code.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth { code: String::new(), message: message.into() }
    }
}

/// Result type alias for MailVault operations
pub type Result<T> = std::result::Result<T, MailVaultError>;
