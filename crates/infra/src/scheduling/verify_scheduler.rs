//! Periodic account verification scheduler

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mailvault_common::crypto::{CredentialCipher, OpenedCredential};
use mailvault_domain::{MailVaultError, Result, VerificationResult};
use serde_json::json;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::graph::GraphClient;
use crate::scheduling::error::{SchedulerError, SchedulerResult};
use crate::store::DocumentStore;

/// Default time between verification passes (6 hours)
pub const DEFAULT_VERIFY_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Simultaneous in-flight verification calls per pass
const MAX_CONCURRENT_VERIFICATIONS: usize = 10;

/// Sleep after an unexpected pass failure before resuming the loop
const PASS_ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// Live credential check, injectable so passes can be tested without the
/// network.
#[async_trait]
pub trait AccountVerifier: Send + Sync {
    /// Must never fail; any problem is reported as `(false, message)`.
    async fn verify(&self, refresh_token: &str, client_id: &str) -> (bool, Option<String>);
}

#[async_trait]
impl AccountVerifier for GraphClient {
    async fn verify(&self, refresh_token: &str, client_id: &str) -> (bool, Option<String>) {
        self.verify_account(refresh_token, client_id).await
    }
}

/// Configuration for the verification scheduler
#[derive(Debug, Clone)]
pub struct VerifySchedulerConfig {
    /// Time between passes
    pub interval: Duration,
    /// Concurrency cap for outbound verification calls
    pub max_concurrency: usize,
    /// Backoff after a failed pass
    pub error_backoff: Duration,
}

impl Default for VerifySchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_VERIFY_INTERVAL,
            max_concurrency: MAX_CONCURRENT_VERIFICATIONS,
            error_backoff: PASS_ERROR_BACKOFF,
        }
    }
}

/// Aggregate outcome of one verification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub valid: usize,
    pub invalid: usize,
    pub errored: usize,
}

/// Type alias for task handle to avoid complexity warnings
type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

/// Shared state handed to the background loop
struct PassContext {
    store: Arc<DocumentStore>,
    verifier: Arc<dyn AccountVerifier>,
    cipher: Arc<CredentialCipher>,
}

/// Background scheduler that periodically verifies every stored account.
pub struct AccountVerifyScheduler {
    store: Arc<DocumentStore>,
    verifier: Arc<dyn AccountVerifier>,
    cipher: Arc<CredentialCipher>,
    config: VerifySchedulerConfig,
    cancellation_token: CancellationToken,
    task_handle: TaskHandle,
}

impl AccountVerifyScheduler {
    pub fn new(
        store: Arc<DocumentStore>,
        verifier: Arc<dyn AccountVerifier>,
        cipher: Arc<CredentialCipher>,
        config: VerifySchedulerConfig,
    ) -> Self {
        Self {
            store,
            verifier,
            cipher,
            config,
            cancellation_token: CancellationToken::new(),
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the scheduler.
    ///
    /// Spawns the background task that sleeps for the configured interval,
    /// then runs one verification pass, forever.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AlreadyRunning`] if already started.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        info!(interval_secs = self.config.interval.as_secs(), "starting account verify scheduler");

        // A fresh token supports restart after stop.
        self.cancellation_token = CancellationToken::new();

        let context = PassContext {
            store: Arc::clone(&self.store),
            verifier: Arc::clone(&self.verifier),
            cipher: Arc::clone(&self.cipher),
        };
        let config = self.config.clone();
        let cancel = self.cancellation_token.clone();

        let handle = tokio::spawn(async move {
            Self::run_loop(context, config, cancel).await;
        });

        *self.task_handle.lock().await = Some(handle);

        Ok(())
    }

    /// Stop the scheduler.
    ///
    /// Cancels a pending sleep promptly and waits until the background task
    /// has fully unwound; a pass already in flight runs to completion first.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::NotRunning`] if not started.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        info!("stopping account verify scheduler");
        self.cancellation_token.cancel();

        if let Some(handle) = self.task_handle.lock().await.take() {
            handle.await.map_err(|e| SchedulerError::TaskJoinFailed(e.to_string()))?;
        }

        info!("account verify scheduler stopped");
        Ok(())
    }

    /// Whether the background task is alive.
    pub fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Run one verification pass immediately, outside the periodic loop.
    pub async fn run_pass(&self) -> Result<PassSummary> {
        let context = PassContext {
            store: Arc::clone(&self.store),
            verifier: Arc::clone(&self.verifier),
            cipher: Arc::clone(&self.cipher),
        };
        Self::execute_pass(&context, self.config.max_concurrency).await
    }

    async fn run_loop(
        context: PassContext,
        config: VerifySchedulerConfig,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("verification loop cancelled");
                    break;
                }
                _ = tokio::time::sleep(config.interval) => {
                    if let Err(e) = Self::execute_pass(&context, config.max_concurrency).await {
                        error!(error = %e, "verification pass failed");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(config.error_backoff) => {}
                        }
                    }
                }
            }
        }
    }

    async fn execute_pass(context: &PassContext, max_concurrency: usize) -> Result<PassSummary> {
        let doc = context.store.read()?;
        let accounts = doc.accounts()?;

        if accounts.is_empty() {
            info!("no accounts to verify");
            return Ok(PassSummary::default());
        }

        info!(count = accounts.len(), "starting account verification pass");
        let started_at = Utc::now().to_rfc3339();

        let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let mut tasks: JoinSet<Result<VerificationResult>> = JoinSet::new();

        for account in accounts {
            let semaphore = Arc::clone(&semaphore);
            let verifier = Arc::clone(&context.verifier);
            let cipher = Arc::clone(&context.cipher);

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|e| {
                    MailVaultError::Internal(format!("concurrency gate closed: {e}"))
                })?;

                let refresh_token = match cipher.open(&account.refresh_token) {
                    OpenedCredential::Failed { value, reason } => {
                        warn!(
                            account_id = %account.id,
                            reason = %reason,
                            "stored credential failed to decrypt; using raw value"
                        );
                        value
                    }
                    outcome => outcome.into_value(),
                };

                let (valid, error) = verifier.verify(&refresh_token, &account.client_id).await;
                Ok(VerificationResult { account_id: account.id, email: account.email, valid, error })
            });
        }

        let mut results = Vec::new();
        let mut errored = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => {
                    errored += 1;
                    warn!(error = %e, "verification task failed");
                }
                Err(e) => {
                    errored += 1;
                    warn!(error = %e, "verification task panicked");
                }
            }
        }

        // One transaction commits every surviving result; errored accounts
        // keep their previous status and timestamp.
        let summary = context.store.update(move |doc| {
            let mut valid = 0usize;
            let mut invalid = 0usize;

            for result in &results {
                let Some(record) = doc.record_by_id_mut("accounts", &result.account_id) else {
                    continue;
                };
                let status = if result.valid {
                    valid += 1;
                    "active"
                } else {
                    invalid += 1;
                    "invalid"
                };
                record.insert("status".to_string(), json!(status));
                record.insert("last_verified".to_string(), json!(started_at.clone()));
            }

            Ok(PassSummary { valid, invalid, errored })
        })?;

        info!(
            valid = summary.valid,
            invalid = summary.invalid,
            errored = summary.errored,
            "verification pass complete"
        );
        Ok(summary)
    }
}

/// Ensure the background task is cancelled when dropped
impl Drop for AccountVerifyScheduler {
    fn drop(&mut self) {
        if !self.cancellation_token.is_cancelled() {
            self.cancellation_token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use mailvault_domain::{AccountStatus, Document};
    use parking_lot::Mutex as SyncMutex;

    use super::*;

    /// Verifier scripted per client_id: `Some(true/false)` verifies, `None`
    /// panics to simulate an unexpected task failure.
    struct ScriptedVerifier {
        outcomes: HashMap<String, Option<bool>>,
        calls: AtomicUsize,
        seen_tokens: SyncMutex<Vec<String>>,
    }

    impl ScriptedVerifier {
        fn new(outcomes: &[(&str, Option<bool>)]) -> Arc<Self> {
            Arc::new(Self {
                outcomes: outcomes
                    .iter()
                    .map(|(id, outcome)| (id.to_string(), *outcome))
                    .collect(),
                calls: AtomicUsize::new(0),
                seen_tokens: SyncMutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AccountVerifier for ScriptedVerifier {
        async fn verify(&self, refresh_token: &str, client_id: &str) -> (bool, Option<String>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_tokens.lock().push(refresh_token.to_string());
            match self.outcomes.get(client_id).copied().flatten() {
                Some(true) => (true, None),
                Some(false) => (false, Some("invalid_grant".to_string())),
                None => panic!("scripted failure for {client_id}"),
            }
        }
    }

    fn seeded_store(dir: &tempfile::TempDir, client_ids: &[&str]) -> Arc<DocumentStore> {
        let store = Arc::new(DocumentStore::new(dir.path().join("data.json")));
        let mut doc = Document::fresh();
        for (i, client_id) in client_ids.iter().enumerate() {
            doc.records_mut("accounts").push(json!({
                "id": format!("a{i}"),
                "email": format!("user{i}@example.com"),
                "refresh_token": format!("rt-{i}"),
                "client_id": client_id,
                "status": "unknown",
                "last_verified": null,
                "created_at": "2026-01-01T00:00:00+00:00",
            }));
        }
        store.write(&doc).unwrap();
        store
    }

    fn scheduler_with(
        store: Arc<DocumentStore>,
        verifier: Arc<dyn AccountVerifier>,
        config: VerifySchedulerConfig,
    ) -> AccountVerifyScheduler {
        AccountVerifyScheduler::new(store, verifier, Arc::new(CredentialCipher::disabled()), config)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pass_commits_results_in_one_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir, &["ok-1", "ok-2", "bad-1", "bad-2", "boom"]);
        let verifier = ScriptedVerifier::new(&[
            ("ok-1", Some(true)),
            ("ok-2", Some(true)),
            ("bad-1", Some(false)),
            ("bad-2", Some(false)),
            ("boom", None),
        ]);

        let scheduler = scheduler_with(
            Arc::clone(&store),
            verifier.clone(),
            VerifySchedulerConfig::default(),
        );
        let summary = scheduler.run_pass().await.unwrap();

        assert_eq!(summary, PassSummary { valid: 2, invalid: 2, errored: 1 });

        let accounts = store.read().unwrap().accounts().unwrap();
        let by_client = |cid: &str| {
            accounts.iter().find(|a| a.client_id == cid).cloned().unwrap()
        };

        assert_eq!(by_client("ok-1").status, AccountStatus::Active);
        assert_eq!(by_client("bad-1").status, AccountStatus::Invalid);
        assert!(by_client("ok-2").last_verified.is_some());
        assert_eq!(by_client("bad-1").last_verified, by_client("bad-2").last_verified);

        // The errored account was left untouched.
        let boom = by_client("boom");
        assert_eq!(boom.status, AccountStatus::Unknown);
        assert!(boom.last_verified.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pass_over_empty_store_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DocumentStore::new(dir.path().join("data.json")));
        let verifier = ScriptedVerifier::new(&[]);

        let scheduler =
            scheduler_with(Arc::clone(&store), verifier.clone(), VerifySchedulerConfig::default());
        let summary = scheduler.run_pass().await.unwrap();

        assert_eq!(summary, PassSummary::default());
        assert_eq!(verifier.call_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pass_decrypts_sealed_credentials() {
        use base64::Engine as _;

        let dir = tempfile::tempdir().unwrap();
        let key = base64::engine::general_purpose::STANDARD.encode([5u8; 32]);
        let cipher = Arc::new(CredentialCipher::from_key_b64(&key).unwrap());

        let store = Arc::new(DocumentStore::new(dir.path().join("data.json")));
        let mut doc = Document::fresh();
        doc.records_mut("accounts").push(json!({
            "id": "a0",
            "email": "user@example.com",
            "refresh_token": cipher.seal("plaintext-token").unwrap(),
            "client_id": "ok",
            "created_at": "2026-01-01T00:00:00+00:00",
        }));
        store.write(&doc).unwrap();

        let verifier = ScriptedVerifier::new(&[("ok", Some(true))]);
        let scheduler = AccountVerifyScheduler::new(
            store,
            verifier.clone(),
            cipher,
            VerifySchedulerConfig::default(),
        );

        scheduler.run_pass().await.unwrap();
        assert_eq!(*verifier.seen_tokens.lock(), vec!["plaintext-token".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pass_degrades_to_raw_value_on_decrypt_failure() {
        use base64::Engine as _;

        let dir = tempfile::tempdir().unwrap();
        let key = base64::engine::general_purpose::STANDARD.encode([5u8; 32]);
        let cipher = Arc::new(CredentialCipher::from_key_b64(&key).unwrap());

        let store = seeded_store(&dir, &["ok-1"]);
        let verifier = ScriptedVerifier::new(&[("ok-1", Some(true))]);
        let scheduler = AccountVerifyScheduler::new(
            store,
            verifier.clone(),
            cipher,
            VerifySchedulerConfig::default(),
        );

        let summary = scheduler.run_pass().await.unwrap();
        assert_eq!(summary.valid, 1);
        // The stored value never decrypted, so the raw value went out.
        assert_eq!(*verifier.seen_tokens.lock(), vec!["rt-0".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lifecycle_start_stop_and_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir, &["ok-1"]);
        let verifier = ScriptedVerifier::new(&[("ok-1", Some(true))]);

        let mut scheduler = scheduler_with(
            store,
            verifier.clone(),
            VerifySchedulerConfig { interval: Duration::from_secs(3600), ..Default::default() },
        );

        assert!(!scheduler.is_running());

        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        assert!(matches!(scheduler.start().await, Err(SchedulerError::AlreadyRunning)));

        // Stopping mid-sleep returns promptly, without a pass having run.
        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());
        assert_eq!(verifier.call_count(), 0);
        assert!(matches!(scheduler.stop().await, Err(SchedulerError::NotRunning)));

        // A later start resumes clean periodic behavior.
        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn short_interval_loop_executes_passes() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir, &["ok-1"]);
        let verifier = ScriptedVerifier::new(&[("ok-1", Some(true))]);

        let mut scheduler = scheduler_with(
            Arc::clone(&store),
            verifier.clone(),
            VerifySchedulerConfig {
                interval: Duration::from_millis(20),
                ..Default::default()
            },
        );

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.stop().await.unwrap();

        assert!(verifier.call_count() >= 1);
        let accounts = store.read().unwrap().accounts().unwrap();
        assert_eq!(accounts[0].status, AccountStatus::Active);
    }
}
