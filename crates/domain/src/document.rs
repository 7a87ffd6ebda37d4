//! The persisted document tree.
//!
//! The whole application dataset lives in a single JSON object with a fixed
//! set of top-level collections. The invariant maintained here is that every
//! collection key is always present as an array; anything else is normalized
//! to an empty array on load.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::errors::{MailVaultError, Result};
use crate::types::{MailAccount, User};

/// The fixed top-level collection keys of the document.
pub const COLLECTION_KEYS: [&str; 3] = ["users", "groups", "accounts"];

/// In-memory form of the persisted JSON document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Map<String, Value>,
}

impl Default for Document {
    fn default() -> Self {
        Self::fresh()
    }
}

impl Document {
    /// A fresh default document: every collection present and empty.
    pub fn fresh() -> Self {
        let mut root = Map::new();
        for key in COLLECTION_KEYS {
            root.insert(key.to_string(), Value::Array(Vec::new()));
        }
        Self { root }
    }

    /// Build a document from a parsed JSON root.
    ///
    /// Rejects a non-object root with [`MailVaultError::Storage`]. Collection
    /// keys that are absent or not arrays are replaced with empty arrays; the
    /// returned flag reports whether any key needed repair.
    pub fn from_root(value: Value) -> Result<(Self, bool)> {
        let mut root = match value {
            Value::Object(map) => map,
            other => {
                return Err(MailVaultError::Storage(format!(
                    "document root must be a JSON object, got {}",
                    json_type_name(&other)
                )))
            }
        };

        let mut changed = false;
        for key in COLLECTION_KEYS {
            if !matches!(root.get(key), Some(Value::Array(_))) {
                root.insert(key.to_string(), Value::Array(Vec::new()));
                changed = true;
            }
        }

        Ok((Self { root }, changed))
    }

    /// The document as a JSON value, for persistence.
    pub fn to_value(&self) -> Value {
        Value::Object(self.root.clone())
    }

    /// Raw records of a collection.
    pub fn records(&self, key: &str) -> &[Value] {
        self.root.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Mutable raw records of a collection.
    pub fn records_mut(&mut self, key: &str) -> &mut Vec<Value> {
        if !matches!(self.root.get(key), Some(Value::Array(_))) {
            self.root.insert(key.to_string(), Value::Array(Vec::new()));
        }
        match self.root.get_mut(key) {
            Some(Value::Array(records)) => records,
            _ => unreachable!("collection key normalized above"),
        }
    }

    /// Find a record in a collection by its `id` field.
    pub fn record_by_id_mut(&mut self, key: &str, id: &str) -> Option<&mut Map<String, Value>> {
        self.records_mut(key)
            .iter_mut()
            .filter_map(Value::as_object_mut)
            .find(|record| record.get("id").and_then(Value::as_str) == Some(id))
    }

    /// Typed view of the `accounts` collection.
    pub fn accounts(&self) -> Result<Vec<MailAccount>> {
        self.typed_records("accounts")
    }

    /// Typed view of the `users` collection.
    pub fn users(&self) -> Result<Vec<User>> {
        self.typed_records("users")
    }

    fn typed_records<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        self.records(key)
            .iter()
            .map(|record| {
                serde_json::from_value(record.clone()).map_err(|e| {
                    MailVaultError::Storage(format!("malformed record in {key}: {e}"))
                })
            })
            .collect()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn fresh_document_has_all_collections() {
        let doc = Document::fresh();
        for key in COLLECTION_KEYS {
            assert!(doc.records(key).is_empty());
        }
    }

    #[test]
    fn from_root_rejects_non_object() {
        let err = Document::from_root(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, MailVaultError::Storage(_)));
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn from_root_normalizes_missing_and_mistyped_keys() {
        let root = json!({
            "users": [],
            "groups": "not-a-list",
            "extra": {"kept": true},
        });

        let (doc, changed) = Document::from_root(root).unwrap();
        assert!(changed);
        assert!(doc.records("groups").is_empty());
        assert!(doc.records("accounts").is_empty());
        // Unknown keys survive normalization untouched.
        assert_eq!(doc.to_value()["extra"], json!({"kept": true}));
    }

    #[test]
    fn from_root_reports_unchanged_for_well_formed_input() {
        let (_, changed) =
            Document::from_root(json!({"users": [], "groups": [], "accounts": []})).unwrap();
        assert!(!changed);
    }

    #[test]
    fn record_by_id_mut_finds_and_edits() {
        let root = json!({
            "users": [], "groups": [],
            "accounts": [{"id": "a1", "email": "a@example.com"}],
        });
        let (mut doc, _) = Document::from_root(root).unwrap();

        let record = doc.record_by_id_mut("accounts", "a1").unwrap();
        record.insert("status".to_string(), json!("active"));

        assert_eq!(doc.records("accounts")[0]["status"], json!("active"));
        assert!(doc.record_by_id_mut("accounts", "missing").is_none());
    }

    #[test]
    fn typed_accounts_view() {
        let root = json!({
            "users": [], "groups": [],
            "accounts": [{
                "id": "a1",
                "email": "a@example.com",
                "refresh_token": "rt",
                "client_id": "cid",
                "created_at": "2026-01-01T00:00:00+00:00",
            }],
        });
        let (doc, _) = Document::from_root(root).unwrap();

        let accounts = doc.accounts().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].email, "a@example.com");
        assert_eq!(accounts[0].status, crate::types::AccountStatus::Unknown);
    }

    #[test]
    fn typed_users_view_rejects_malformed_records() {
        let root = json!({
            "users": [
                {"id": "u1", "username": "alice", "role": "admin"},
                {"id": 42},
            ],
            "groups": [], "accounts": [],
        });
        let (doc, _) = Document::from_root(root).unwrap();

        let err = doc.users().unwrap_err();
        assert!(matches!(err, MailVaultError::Storage(_)));
    }
}
