//! Microsoft Graph client
//!
//! Exchanges long-lived refresh tokens for short-lived access tokens
//! (consulting and populating the shared token cache) and issues
//! authenticated mail requests with bounded rate-limit retries.

pub mod client;

pub use client::{GraphClient, GraphClientConfig};
