//! Account and group mutations over the document store
//!
//! Every write here is one [`DocumentStore::update`] transaction: domain
//! failures (duplicate email, unknown group, missing account) propagate out
//! of the mutation and nothing reaches the disk.

use std::sync::Arc;

use chrono::Utc;
use mailvault_common::crypto::CredentialCipher;
use mailvault_domain::{
    AccountStatus, Document, Group, MailAccount, MailVaultError, Result,
};
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::store::DocumentStore;

/// Input for creating one account.
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub refresh_token: String,
    pub client_id: String,
    pub group_id: Option<String>,
    pub remark: Option<String>,
}

/// Partial update of an account. `group_id` distinguishes "leave untouched"
/// (`None`) from "set/clear" (`Some(..)`).
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub email: Option<String>,
    pub password: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub group_id: Option<Option<String>>,
    pub remark: Option<String>,
}

/// Owner-scoped listing filters.
#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    /// Case-insensitive email substring
    pub search: Option<String>,
    pub group_id: Option<String>,
    pub status: Option<AccountStatus>,
}

/// Result of a batch import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// CRUD operations on accounts and groups, scoped to their owning user.
pub struct AccountService {
    store: Arc<DocumentStore>,
    cipher: Arc<CredentialCipher>,
}

impl AccountService {
    pub fn new(store: Arc<DocumentStore>, cipher: Arc<CredentialCipher>) -> Self {
        Self { store, cipher }
    }

    /// Accounts owned by `owner_id`, optionally filtered.
    pub fn list(&self, owner_id: &str, filter: &AccountFilter) -> Result<Vec<MailAccount>> {
        let doc = self.store.read()?;
        let search = filter.search.as_ref().map(|s| s.to_lowercase());

        Ok(doc
            .accounts()?
            .into_iter()
            .filter(|a| a.owner_id.as_deref() == Some(owner_id))
            .filter(|a| {
                search.as_ref().map_or(true, |needle| a.email.to_lowercase().contains(needle))
            })
            .filter(|a| {
                filter.group_id.as_ref().map_or(true, |g| a.group_id.as_ref() == Some(g))
            })
            .filter(|a| filter.status.map_or(true, |s| a.status == s))
            .collect())
    }

    /// Create an account with sealed credentials and `unknown` status.
    pub fn create(&self, owner_id: &str, new_account: NewAccount) -> Result<MailAccount> {
        let account = MailAccount {
            id: Uuid::new_v4().to_string(),
            owner_id: Some(owner_id.to_string()),
            email: new_account.email,
            password: self.cipher.seal(&new_account.password)?,
            refresh_token: self.cipher.seal(&new_account.refresh_token)?,
            client_id: new_account.client_id,
            group_id: new_account.group_id,
            remark: new_account.remark,
            status: AccountStatus::Unknown,
            last_verified: None,
            created_at: Utc::now().to_rfc3339(),
        };
        let owner = owner_id.to_string();

        let created = self.store.update(move |doc| {
            if email_taken(doc, &owner, &account.email, None) {
                return Err(MailVaultError::Conflict(
                    "account with this email already exists".to_string(),
                ));
            }
            if let Some(group_id) = &account.group_id {
                ensure_group_exists(doc, &owner, group_id)?;
            }

            let record = serde_json::to_value(&account).map_err(|e| {
                MailVaultError::Internal(format!("failed to encode account: {e}"))
            })?;
            doc.records_mut("accounts").push(record);
            Ok(account)
        })?;

        info!(account_id = %created.id, email = %created.email, "account created");
        Ok(created)
    }

    /// Apply a partial update. Replacing the refresh credential resets the
    /// verification status to `unknown`.
    pub fn update(
        &self,
        owner_id: &str,
        account_id: &str,
        patch: AccountPatch,
    ) -> Result<MailAccount> {
        let sealed_password =
            patch.password.as_deref().map(|p| self.cipher.seal(p)).transpose()?;
        let sealed_refresh =
            patch.refresh_token.as_deref().map(|t| self.cipher.seal(t)).transpose()?;
        let owner = owner_id.to_string();
        let id = account_id.to_string();

        self.store.update(move |doc| {
            if find_account(doc, &owner, &id).is_none() {
                return Err(MailVaultError::NotFound("account not found".to_string()));
            }
            if let Some(email) = &patch.email {
                if email_taken(doc, &owner, email, Some(id.as_str())) {
                    return Err(MailVaultError::Conflict(
                        "account with this email already exists".to_string(),
                    ));
                }
            }
            if let Some(Some(group_id)) = &patch.group_id {
                ensure_group_exists(doc, &owner, group_id)?;
            }

            let Some(record) = find_account_mut(doc, &owner, &id) else {
                return Err(MailVaultError::NotFound("account not found".to_string()));
            };

            if let Some(email) = patch.email {
                record.insert("email".to_string(), json!(email));
            }
            if let Some(password) = sealed_password {
                record.insert("password".to_string(), json!(password));
            }
            if let Some(refresh_token) = sealed_refresh {
                record.insert("refresh_token".to_string(), json!(refresh_token));
                // A new credential invalidates the previous verification.
                record.insert("status".to_string(), json!(AccountStatus::Unknown.as_str()));
            }
            if let Some(client_id) = patch.client_id {
                record.insert("client_id".to_string(), json!(client_id));
            }
            if let Some(group_id) = patch.group_id {
                record.insert("group_id".to_string(), json!(group_id));
            }
            if let Some(remark) = patch.remark {
                record.insert("remark".to_string(), json!(remark));
            }

            serde_json::from_value(Value::Object(record.clone())).map_err(|e| {
                MailVaultError::Storage(format!("malformed account record: {e}"))
            })
        })
    }

    /// Delete one account.
    pub fn delete(&self, owner_id: &str, account_id: &str) -> Result<()> {
        let owner = owner_id.to_string();
        let id = account_id.to_string();

        self.store.update(move |doc| {
            let accounts = doc.records_mut("accounts");
            let position = accounts.iter().position(|record| {
                record.as_object().map_or(false, |a| record_matches(a, &owner, &id))
            });

            match position {
                Some(index) => {
                    accounts.remove(index);
                    Ok(())
                }
                None => Err(MailVaultError::NotFound("account not found".to_string())),
            }
        })
    }

    /// Delete any of the given accounts the owner has; returns how many were
    /// removed. Unknown ids are ignored.
    pub fn batch_delete(&self, owner_id: &str, ids: &[String]) -> Result<usize> {
        let owner = owner_id.to_string();
        let ids: Vec<String> = ids.to_vec();

        self.store.update(move |doc| {
            let accounts = doc.records_mut("accounts");
            let before = accounts.len();
            accounts.retain(|record| {
                record.as_object().map_or(true, |a| {
                    let id = a.get("id").and_then(Value::as_str).unwrap_or_default();
                    !(ids.iter().any(|wanted| wanted.as_str() == id)
                        && a.get("owner_id").and_then(Value::as_str) == Some(owner.as_str()))
                })
            });
            Ok(before - accounts.len())
        })
    }

    /// Import `email----password----refresh_token----client_id` lines.
    ///
    /// Malformed lines and owner-scoped duplicate emails are counted and
    /// skipped; everything importable commits in one transaction.
    pub fn batch_import(
        &self,
        owner_id: &str,
        data: &str,
        group_id: Option<&str>,
    ) -> Result<ImportReport> {
        let mut candidates = Vec::new();
        let mut errors = 0usize;

        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_account_line(line) {
                Some(parsed) => candidates.push(parsed),
                None => errors += 1,
            }
        }

        let mut sealed = Vec::with_capacity(candidates.len());
        for parsed in candidates {
            let password = self.cipher.seal(&parsed.password)?;
            let refresh_token = self.cipher.seal(&parsed.refresh_token)?;
            sealed.push((parsed, password, refresh_token));
        }

        let owner = owner_id.to_string();
        let group = group_id.map(|g| g.to_string());

        let report = self.store.update(move |doc| {
            if let Some(group_id) = &group {
                ensure_group_exists(doc, &owner, group_id)?;
            }

            let mut existing: Vec<String> = doc
                .records("accounts")
                .iter()
                .filter_map(Value::as_object)
                .filter(|a| a.get("owner_id").and_then(Value::as_str) == Some(owner.as_str()))
                .filter_map(|a| a.get("email").and_then(Value::as_str))
                .map(str::to_string)
                .collect();

            let mut imported = 0usize;
            let mut skipped = 0usize;
            let now = Utc::now().to_rfc3339();

            for (parsed, password, refresh_token) in sealed {
                if existing.iter().any(|email| email == &parsed.email) {
                    skipped += 1;
                    continue;
                }

                let account = MailAccount {
                    id: Uuid::new_v4().to_string(),
                    owner_id: Some(owner.clone()),
                    email: parsed.email.clone(),
                    password,
                    refresh_token,
                    client_id: parsed.client_id,
                    group_id: group.clone(),
                    remark: None,
                    status: AccountStatus::Unknown,
                    last_verified: None,
                    created_at: now.clone(),
                };
                let record = serde_json::to_value(&account).map_err(|e| {
                    MailVaultError::Internal(format!("failed to encode account: {e}"))
                })?;
                doc.records_mut("accounts").push(record);
                existing.push(parsed.email);
                imported += 1;
            }

            Ok(ImportReport { imported, skipped, errors })
        })?;

        info!(
            imported = report.imported,
            skipped = report.skipped,
            errors = report.errors,
            "batch import finished"
        );
        Ok(report)
    }

    /// Create a group for the owner; duplicate names conflict.
    pub fn create_group(&self, owner_id: &str, name: &str) -> Result<Group> {
        let group = Group {
            id: Uuid::new_v4().to_string(),
            owner_id: Some(owner_id.to_string()),
            name: name.to_string(),
        };
        let owner = owner_id.to_string();

        self.store.update(move |doc| {
            let duplicate = doc.records("groups").iter().filter_map(Value::as_object).any(|g| {
                g.get("owner_id").and_then(Value::as_str) == Some(owner.as_str())
                    && g.get("name").and_then(Value::as_str) == Some(group.name.as_str())
            });
            if duplicate {
                return Err(MailVaultError::Conflict(
                    "group with this name already exists".to_string(),
                ));
            }

            let record = serde_json::to_value(&group).map_err(|e| {
                MailVaultError::Internal(format!("failed to encode group: {e}"))
            })?;
            doc.records_mut("groups").push(record);
            Ok(group)
        })
    }

    /// Groups owned by `owner_id`.
    pub fn list_groups(&self, owner_id: &str) -> Result<Vec<Group>> {
        let doc = self.store.read()?;
        doc.records("groups")
            .iter()
            .filter(|record| {
                record.get("owner_id").and_then(Value::as_str) == Some(owner_id)
            })
            .map(|record| {
                serde_json::from_value(record.clone()).map_err(|e| {
                    MailVaultError::Storage(format!("malformed group record: {e}"))
                })
            })
            .collect()
    }
}

/// One parsed import line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedAccountLine {
    email: String,
    password: String,
    refresh_token: String,
    client_id: String,
}

/// Parse `email----password----refresh_token----client_id`. Lines with fewer
/// fields or a missing email/refresh_token/client_id are rejected.
fn parse_account_line(line: &str) -> Option<ParsedAccountLine> {
    let parts: Vec<&str> = line.trim().split("----").collect();
    if parts.len() < 4 {
        return None;
    }

    let parsed = ParsedAccountLine {
        email: parts[0].trim().to_string(),
        password: parts[1].trim().to_string(),
        refresh_token: parts[2].trim().to_string(),
        client_id: parts[3].trim().to_string(),
    };

    if parsed.email.is_empty() || parsed.refresh_token.is_empty() || parsed.client_id.is_empty() {
        return None;
    }
    Some(parsed)
}

fn record_matches(record: &Map<String, Value>, owner_id: &str, account_id: &str) -> bool {
    record.get("id").and_then(Value::as_str) == Some(account_id)
        && record.get("owner_id").and_then(Value::as_str) == Some(owner_id)
}

fn find_account<'a>(
    doc: &'a Document,
    owner_id: &str,
    account_id: &str,
) -> Option<&'a Map<String, Value>> {
    doc.records("accounts")
        .iter()
        .filter_map(Value::as_object)
        .find(|a| record_matches(a, owner_id, account_id))
}

fn find_account_mut<'a>(
    doc: &'a mut Document,
    owner_id: &str,
    account_id: &str,
) -> Option<&'a mut Map<String, Value>> {
    doc.records_mut("accounts")
        .iter_mut()
        .filter_map(Value::as_object_mut)
        .find(|a| record_matches(a, owner_id, account_id))
}

fn email_taken(doc: &Document, owner_id: &str, email: &str, except_id: Option<&str>) -> bool {
    doc.records("accounts").iter().filter_map(Value::as_object).any(|a| {
        a.get("owner_id").and_then(Value::as_str) == Some(owner_id)
            && a.get("email").and_then(Value::as_str) == Some(email)
            && a.get("id").and_then(Value::as_str) != except_id
    })
}

fn ensure_group_exists(doc: &Document, owner_id: &str, group_id: &str) -> Result<()> {
    let found = doc.records("groups").iter().filter_map(Value::as_object).any(|g| {
        g.get("id").and_then(Value::as_str) == Some(group_id)
            && g.get("owner_id").and_then(Value::as_str) == Some(owner_id)
    });
    if found {
        Ok(())
    } else {
        Err(MailVaultError::NotFound("group not found".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (tempfile::TempDir, AccountService) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DocumentStore::new(dir.path().join("data.json")));
        let service = AccountService::new(store, Arc::new(CredentialCipher::disabled()));
        (dir, service)
    }

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            email: email.to_string(),
            password: "pw".to_string(),
            refresh_token: "rt".to_string(),
            client_id: "cid".to_string(),
            group_id: None,
            remark: None,
        }
    }

    #[test]
    fn create_and_list_accounts() {
        let (_dir, service) = service();

        let created = service.create("u1", new_account("a@example.com")).unwrap();
        assert_eq!(created.status, AccountStatus::Unknown);
        assert!(!created.created_at.is_empty());

        let listed = service.list("u1", &AccountFilter::default()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].email, "a@example.com");

        // Other owners see nothing.
        assert!(service.list("u2", &AccountFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn duplicate_email_conflicts_per_owner() {
        let (_dir, service) = service();
        service.create("u1", new_account("a@example.com")).unwrap();

        let err = service.create("u1", new_account("a@example.com")).unwrap_err();
        assert!(matches!(err, MailVaultError::Conflict(_)));

        // A different owner may reuse the address.
        service.create("u2", new_account("a@example.com")).unwrap();
    }

    #[test]
    fn create_rejects_unknown_group() {
        let (_dir, service) = service();
        let mut account = new_account("a@example.com");
        account.group_id = Some("missing".to_string());

        let err = service.create("u1", account).unwrap_err();
        assert!(matches!(err, MailVaultError::NotFound(_)));
        assert!(service.list("u1", &AccountFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn list_filters_by_search_group_and_status() {
        let (_dir, service) = service();
        let group = service.create_group("u1", "work").unwrap();

        let mut in_group = new_account("work@corp.com");
        in_group.group_id = Some(group.id.clone());
        service.create("u1", in_group).unwrap();
        service.create("u1", new_account("personal@home.net")).unwrap();

        let by_search = service
            .list("u1", &AccountFilter { search: Some("CORP".to_string()), ..Default::default() })
            .unwrap();
        assert_eq!(by_search.len(), 1);

        let by_group = service
            .list("u1", &AccountFilter { group_id: Some(group.id), ..Default::default() })
            .unwrap();
        assert_eq!(by_group.len(), 1);

        let by_status = service
            .list(
                "u1",
                &AccountFilter { status: Some(AccountStatus::Active), ..Default::default() },
            )
            .unwrap();
        assert!(by_status.is_empty());
    }

    #[test]
    fn update_patches_fields_and_resets_status_on_new_credential() {
        let (_dir, service) = service();
        let created = service.create("u1", new_account("a@example.com")).unwrap();

        // Simulate a verified account.
        let patched = service
            .update(
                "u1",
                &created.id,
                AccountPatch { remark: Some("vip".to_string()), ..Default::default() },
            )
            .unwrap();
        assert_eq!(patched.remark.as_deref(), Some("vip"));
        assert_eq!(patched.status, AccountStatus::Unknown);

        let repatched = service
            .update(
                "u1",
                &created.id,
                AccountPatch { refresh_token: Some("rt-2".to_string()), ..Default::default() },
            )
            .unwrap();
        assert_eq!(repatched.status, AccountStatus::Unknown);
        assert_eq!(repatched.refresh_token, "rt-2");
    }

    #[test]
    fn update_missing_account_is_not_found() {
        let (_dir, service) = service();
        let err = service.update("u1", "nope", AccountPatch::default()).unwrap_err();
        assert!(matches!(err, MailVaultError::NotFound(_)));
    }

    #[test]
    fn update_cannot_steal_anothers_email() {
        let (_dir, service) = service();
        service.create("u1", new_account("a@example.com")).unwrap();
        let second = service.create("u1", new_account("b@example.com")).unwrap();

        let err = service
            .update(
                "u1",
                &second.id,
                AccountPatch { email: Some("a@example.com".to_string()), ..Default::default() },
            )
            .unwrap_err();
        assert!(matches!(err, MailVaultError::Conflict(_)));
    }

    #[test]
    fn delete_is_owner_scoped() {
        let (_dir, service) = service();
        let created = service.create("u1", new_account("a@example.com")).unwrap();

        let err = service.delete("intruder", &created.id).unwrap_err();
        assert!(matches!(err, MailVaultError::NotFound(_)));

        service.delete("u1", &created.id).unwrap();
        assert!(service.list("u1", &AccountFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn batch_delete_counts_removed_accounts() {
        let (_dir, service) = service();
        let a = service.create("u1", new_account("a@example.com")).unwrap();
        let b = service.create("u1", new_account("b@example.com")).unwrap();
        service.create("u1", new_account("c@example.com")).unwrap();

        let removed = service
            .batch_delete("u1", &[a.id, b.id, "unknown".to_string()])
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(service.list("u1", &AccountFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn batch_import_counts_imported_skipped_and_errors() {
        let (_dir, service) = service();
        service.create("u1", new_account("dup@example.com")).unwrap();

        let data = "\
new@example.com----pw----rt----cid
dup@example.com----pw----rt----cid
broken-line
missing@example.com----pw--------cid

second@example.com----pw----rt----cid";

        let report = service.batch_import("u1", data, None).unwrap();
        assert_eq!(report, ImportReport { imported: 2, skipped: 1, errors: 2 });

        let emails: Vec<String> = service
            .list("u1", &AccountFilter::default())
            .unwrap()
            .into_iter()
            .map(|a| a.email)
            .collect();
        assert!(emails.contains(&"new@example.com".to_string()));
        assert!(emails.contains(&"second@example.com".to_string()));
    }

    #[test]
    fn batch_import_deduplicates_within_the_batch() {
        let (_dir, service) = service();

        let data = "\
same@example.com----pw----rt----cid
same@example.com----pw----rt----cid";

        let report = service.batch_import("u1", data, None).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn groups_round_trip_and_reject_duplicates() {
        let (_dir, service) = service();
        let group = service.create_group("u1", "work").unwrap();

        let err = service.create_group("u1", "work").unwrap_err();
        assert!(matches!(err, MailVaultError::Conflict(_)));

        let groups = service.list_groups("u1").unwrap();
        assert_eq!(groups, vec![group]);
        assert!(service.list_groups("u2").unwrap().is_empty());
    }

    #[test]
    fn sealed_credentials_are_stored_sealed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DocumentStore::new(dir.path().join("data.json")));
        let key = {
            use base64::Engine as _;
            base64::engine::general_purpose::STANDARD.encode([3u8; 32])
        };
        let cipher = Arc::new(CredentialCipher::from_key_b64(&key).unwrap());
        let service = AccountService::new(Arc::clone(&store), Arc::clone(&cipher));

        let created = service.create("u1", new_account("a@example.com")).unwrap();
        assert_ne!(created.refresh_token, "rt");

        use mailvault_common::crypto::OpenedCredential;
        assert_eq!(
            cipher.open(&created.refresh_token),
            OpenedCredential::Decrypted("rt".to_string())
        );
    }

    #[test]
    fn parse_account_line_variants() {
        let parsed = parse_account_line("a@b.c----pw----rt----cid").unwrap();
        assert_eq!(parsed.email, "a@b.c");
        assert_eq!(parsed.client_id, "cid");

        // Extra separators beyond the fourth field are tolerated.
        assert!(parse_account_line("a@b.c----pw----rt----cid----extra").is_some());
        // Password may be empty, the other fields may not.
        assert!(parse_account_line("a@b.c--------rt----cid").is_some());
        assert!(parse_account_line("----pw----rt----cid").is_none());
        assert!(parse_account_line("a@b.c----pw----rt").is_none());
    }
}
