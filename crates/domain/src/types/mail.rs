//! Mail resource views returned by the Graph client

use serde::{Deserialize, Serialize};

/// A mail folder with its message counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailFolder {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub unread_count: i64,
    #[serde(default)]
    pub total_count: i64,
}

/// Summary of a message inside a folder listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMessage {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from_address: Option<String>,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub received_at: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub body_preview: Option<String>,
}

/// Full details of a single message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailDetail {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub from_address: Option<String>,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub received_at: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub body_content: Option<String>,
    #[serde(default = "default_body_type")]
    pub body_type: String,
}

fn default_body_type() -> String {
    "text".to_string()
}
