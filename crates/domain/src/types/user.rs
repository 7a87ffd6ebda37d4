//! User records

use serde::{Deserialize, Serialize};

/// A registered application user.
///
/// `password_hash` stays inside the document; the stored digest is produced
/// and checked by the authentication layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub password_hash: String,
    /// `"user"` or `"admin"`
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub must_change_password: bool,
    #[serde(default)]
    pub created_at: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

fn default_role() -> String {
    "user".to_string()
}
