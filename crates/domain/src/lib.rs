//! # MailVault Domain
//!
//! Shared types and errors for the MailVault account manager.
//!
//! This crate contains:
//! - The persisted [`Document`] tree and its collection invariants
//! - Account, group and mail resource types
//! - The [`MailVaultError`] taxonomy used across all crates
//!
//! ## Architecture
//! - No I/O, no async: pure data and invariants
//! - Depended on by `mailvault-common` and `mailvault-infra`

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod document;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use document::{Document, COLLECTION_KEYS};
pub use errors::{MailVaultError, Result};
pub use types::*;
