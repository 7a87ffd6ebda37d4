//! Account and group records

use std::fmt;

use serde::{Deserialize, Serialize};

/// Verification state of a stored mail account.
///
/// `Unknown` is the initial state and the state after a credential change;
/// a verification attempt moves the account to `Active` or `Invalid`, and
/// every state is re-enterable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Unknown,
    Active,
    Invalid,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Active => "active",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored mail account.
///
/// `password` and `refresh_token` hold the sealed form when a credential
/// cipher is configured. Fields beyond the typed ones are preserved on disk
/// because mutations edit the raw JSON records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailAccount {
    pub id: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default)]
    pub last_verified: Option<String>,
    #[serde(default)]
    pub created_at: String,
}

/// A user-owned account group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub name: String,
}

/// Outcome of verifying one account's credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub account_id: String,
    pub email: String,
    pub valid: bool,
    #[serde(default)]
    pub error: Option<String>,
}
