//! Environment-driven settings
//!
//! ## Environment Variables
//! - `MAILVAULT_DATA_FILE`: path of the JSON data file
//! - `MAILVAULT_TOKEN_ENC_KEY`: base64 32-byte key sealing stored credentials
//! - `MAILVAULT_VERIFY_INTERVAL_HOURS`: hours between verification passes
//! - `MAILVAULT_REQUEST_TIMEOUT_SECS`: timeout for outbound Graph calls

use std::path::PathBuf;
use std::time::Duration;

use mailvault_common::crypto::CredentialCipher;
use tracing::warn;

/// Default location of the data file, relative to the working directory.
pub const DEFAULT_DATA_FILE: &str = "data/data.json";

const DEFAULT_VERIFY_INTERVAL_HOURS: u64 = 6;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_file_path: PathBuf,
    /// Base64-encoded 32-byte credential key; `None` disables sealing
    pub token_enc_key: Option<String>,
    pub verify_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_file_path: PathBuf::from(DEFAULT_DATA_FILE),
            token_enc_key: None,
            verify_interval: Duration::from_secs(DEFAULT_VERIFY_INTERVAL_HOURS * 3600),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl Settings {
    /// Load settings from the environment, falling back to defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let data_file_path = std::env::var("MAILVAULT_DATA_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_FILE));

        let token_enc_key =
            std::env::var("MAILVAULT_TOKEN_ENC_KEY").ok().filter(|key| !key.trim().is_empty());

        let verify_interval = Duration::from_secs(
            env_u64("MAILVAULT_VERIFY_INTERVAL_HOURS", DEFAULT_VERIFY_INTERVAL_HOURS) * 3600,
        );
        let request_timeout =
            Duration::from_secs(env_u64("MAILVAULT_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS));

        Self { data_file_path, token_enc_key, verify_interval, request_timeout }
    }

    /// Build the credential cipher from the configured key.
    ///
    /// An unparsable key logs a warning and disables sealing instead of
    /// failing startup; stored values then pass through untouched.
    pub fn credential_cipher(&self) -> CredentialCipher {
        match &self.token_enc_key {
            None => CredentialCipher::disabled(),
            Some(key) => match CredentialCipher::from_key_b64(key) {
                Ok(cipher) => cipher,
                Err(e) => {
                    warn!(error = %e, "invalid credential key; sealing disabled");
                    CredentialCipher::disabled()
                }
            },
        }
    }
}

/// Parse an unsigned integer from the environment, with a default.
fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}
