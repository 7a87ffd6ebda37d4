//! Credential sealing for values stored in the document
//!
//! Stored refresh credentials and passwords are sealed with AES-256-GCM when
//! a symmetric key is configured. Opening a sealed value reports an explicit
//! outcome so callers can degrade gracefully while keeping decrypt failures
//! visible to operators.

pub mod sealing;

pub use sealing::{CredentialCipher, OpenedCredential};
