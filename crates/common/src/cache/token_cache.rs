//! Time-bounded access-token cache

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::time::{Clock, SystemClock};

/// Safety window subtracted from a token's expiry (5 minutes)
pub const DEFAULT_TOKEN_BUFFER_SECONDS: u64 = 300;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: SystemTime,
}

/// Thread-safe token cache keyed by account identifier.
///
/// Generic over [`Clock`] so expiry behavior is deterministic under test.
/// Owned by the application root and shared by reference; there is no
/// global instance.
pub struct TokenCache<C: Clock = SystemClock> {
    entries: Mutex<HashMap<String, CachedToken>>,
    buffer: Duration,
    clock: C,
}

impl TokenCache<SystemClock> {
    /// Cache with the default 300 second buffer margin.
    pub fn new() -> Self {
        Self::with_buffer(Duration::from_secs(DEFAULT_TOKEN_BUFFER_SECONDS))
    }

    pub fn with_buffer(buffer: Duration) -> Self {
        Self::with_clock(buffer, SystemClock)
    }
}

impl Default for TokenCache<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> TokenCache<C> {
    /// Cache with a custom clock (for testing).
    pub fn with_clock(buffer: Duration, clock: C) -> Self {
        Self { entries: Mutex::new(HashMap::new()), buffer, clock }
    }

    /// Return the cached token unless it is within the buffer margin of
    /// expiry. An entry that close to expiry is evicted during the lookup.
    pub fn get(&self, account_id: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        let cached = entries.get(account_id)?;

        let now = self.clock.system_time();
        if now + self.buffer >= cached.expires_at {
            entries.remove(account_id);
            tracing::debug!(account_id = %account_id, "evicted expiring token");
            return None;
        }

        Some(cached.access_token.clone())
    }

    /// Store a token valid for `expires_in_secs`, overwriting any prior
    /// entry for the account.
    pub fn set(&self, account_id: &str, access_token: String, expires_in_secs: u64) {
        let expires_at = self.clock.system_time() + Duration::from_secs(expires_in_secs);
        self.entries
            .lock()
            .insert(account_id.to_string(), CachedToken { access_token, expires_at });
    }

    /// Drop the entry for one account (credential rotation).
    pub fn delete(&self, account_id: &str) {
        self.entries.lock().remove(account_id);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of entries currently held, including stale ones.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }
}
