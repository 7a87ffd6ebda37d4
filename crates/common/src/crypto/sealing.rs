//! AES-256-GCM sealing of stored credentials

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use mailvault_domain::{MailVaultError, Result};
use serde::{Deserialize, Serialize};

const ALGORITHM: &str = "AES-256-GCM";
const NONCE_LEN: usize = 12;

/// Serializable sealed-credential container.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedPayload {
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
    algorithm: String,
}

/// Result of opening a stored credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenedCredential {
    /// No key is configured; the stored value is used as-is by design.
    Passthrough(String),
    /// The value was sealed and decrypted successfully.
    Decrypted(String),
    /// A key is configured but the value would not decrypt. The raw stored
    /// value is carried so callers can still degrade to using it.
    Failed { value: String, reason: String },
}

impl OpenedCredential {
    /// The usable credential value, regardless of outcome.
    pub fn into_value(self) -> String {
        match self {
            Self::Passthrough(value) | Self::Decrypted(value) => value,
            Self::Failed { value, .. } => value,
        }
    }
}

/// AES-256-GCM cipher for credentials persisted in the document.
///
/// A cipher without a key passes values through untouched, matching a
/// deployment that has not configured `MAILVAULT_TOKEN_ENC_KEY`.
pub struct CredentialCipher {
    cipher: Option<Aes256Gcm>,
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCipher").field("enabled", &self.cipher.is_some()).finish()
    }
}

impl CredentialCipher {
    /// Cipher with no key configured: seal and open are pass-through.
    pub fn disabled() -> Self {
        Self { cipher: None }
    }

    /// Build a cipher from a base64-encoded 32-byte key.
    pub fn from_key_b64(encoded: &str) -> Result<Self> {
        let key = BASE64
            .decode(encoded.trim())
            .map_err(|e| MailVaultError::Crypto(format!("credential key is not valid base64: {e}")))?;

        if key.len() != 32 {
            return Err(MailVaultError::Crypto(format!(
                "credential key must decode to 32 bytes, got {}",
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| MailVaultError::Crypto(format!("failed to initialize cipher: {e}")))?;

        Ok(Self { cipher: Some(cipher) })
    }

    pub fn is_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    /// Seal a credential for storage. Empty values and the disabled cipher
    /// pass through unchanged.
    pub fn seal(&self, value: &str) -> Result<String> {
        let Some(cipher) = self.cipher.as_ref() else {
            return Ok(value.to_string());
        };
        if value.is_empty() {
            return Ok(String::new());
        }

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, value.as_bytes())
            .map_err(|e| MailVaultError::Crypto(format!("encryption failed: {e}")))?;

        let payload =
            SealedPayload { nonce: nonce.to_vec(), ciphertext, algorithm: ALGORITHM.to_string() };
        let serialized = serde_json::to_vec(&payload)
            .map_err(|e| MailVaultError::Crypto(format!("failed to encode sealed payload: {e}")))?;

        Ok(BASE64.encode(serialized))
    }

    /// Open a stored credential, reporting how the value was obtained.
    pub fn open(&self, value: &str) -> OpenedCredential {
        let Some(cipher) = self.cipher.as_ref() else {
            return OpenedCredential::Passthrough(value.to_string());
        };
        if value.is_empty() {
            return OpenedCredential::Passthrough(String::new());
        }

        match Self::try_open(cipher, value) {
            Ok(plaintext) => OpenedCredential::Decrypted(plaintext),
            Err(reason) => OpenedCredential::Failed { value: value.to_string(), reason },
        }
    }

    fn try_open(cipher: &Aes256Gcm, value: &str) -> std::result::Result<String, String> {
        let decoded = BASE64.decode(value).map_err(|e| format!("not base64: {e}"))?;
        let payload: SealedPayload =
            serde_json::from_slice(&decoded).map_err(|e| format!("not a sealed payload: {e}"))?;

        if payload.algorithm != ALGORITHM {
            return Err(format!("unsupported algorithm: {}", payload.algorithm));
        }
        if payload.nonce.len() != NONCE_LEN {
            return Err(format!("invalid nonce length: {}", payload.nonce.len()));
        }

        let nonce = Nonce::from_slice(&payload.nonce);
        let plaintext = cipher
            .decrypt(nonce, payload.ciphertext.as_ref())
            .map_err(|e| format!("decryption failed: {e}"))?;

        String::from_utf8(plaintext).map_err(|e| format!("plaintext is not UTF-8: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        BASE64.encode([7u8; 32])
    }

    #[test]
    fn seal_and_open_round_trip() {
        let cipher = CredentialCipher::from_key_b64(&test_key()).unwrap();

        let sealed = cipher.seal("0.AXoA-refresh-token").unwrap();
        assert_ne!(sealed, "0.AXoA-refresh-token");

        let opened = cipher.open(&sealed);
        assert_eq!(opened, OpenedCredential::Decrypted("0.AXoA-refresh-token".to_string()));
    }

    #[test]
    fn disabled_cipher_passes_values_through() {
        let cipher = CredentialCipher::disabled();
        assert!(!cipher.is_enabled());

        assert_eq!(cipher.seal("plain").unwrap(), "plain");
        assert_eq!(cipher.open("plain"), OpenedCredential::Passthrough("plain".to_string()));
    }

    #[test]
    fn empty_values_pass_through_even_with_a_key() {
        let cipher = CredentialCipher::from_key_b64(&test_key()).unwrap();
        assert_eq!(cipher.seal("").unwrap(), "");
        assert_eq!(cipher.open(""), OpenedCredential::Passthrough(String::new()));
    }

    #[test]
    fn open_reports_failure_and_keeps_raw_value() {
        let cipher = CredentialCipher::from_key_b64(&test_key()).unwrap();

        let opened = cipher.open("not-a-sealed-value");
        match opened {
            OpenedCredential::Failed { value, reason } => {
                assert_eq!(value, "not-a-sealed-value");
                assert!(!reason.is_empty());
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let sealer = CredentialCipher::from_key_b64(&test_key()).unwrap();
        let sealed = sealer.seal("secret").unwrap();

        let other = CredentialCipher::from_key_b64(&BASE64.encode([9u8; 32])).unwrap();
        assert!(matches!(other.open(&sealed), OpenedCredential::Failed { .. }));
    }

    #[test]
    fn rejects_keys_of_the_wrong_length() {
        let err = CredentialCipher::from_key_b64(&BASE64.encode([1u8; 16])).unwrap_err();
        assert!(matches!(err, MailVaultError::Crypto(_)));

        let err = CredentialCipher::from_key_b64("@@not-base64@@").unwrap_err();
        assert!(matches!(err, MailVaultError::Crypto(_)));
    }

    #[test]
    fn into_value_degrades_to_raw_on_failure() {
        let cipher = CredentialCipher::from_key_b64(&test_key()).unwrap();
        assert_eq!(cipher.open("garbage").into_value(), "garbage");
    }
}
