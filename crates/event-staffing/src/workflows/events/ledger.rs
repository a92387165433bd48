//! Idempotency ledger guarding at-most-once notifications.
//!
//! Injected into the deadline sweep so the backing store can be durable and
//! replaced by a double in tests. Entries expire after their TTL; an expired
//! entry reads as absent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use super::domain::OccurrenceId;
use super::repository::RepositoryError;

/// Key-value store with per-entry expiry.
pub trait IdempotencyLedger: Send + Sync {
    /// Instant the key was recorded, if present and unexpired at `now`.
    fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, RepositoryError>;
    fn set(&self, key: &str, now: DateTime<Utc>, ttl: Duration) -> Result<(), RepositoryError>;
    /// Drop entries expired at `now`, returning how many were removed.
    fn evict(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError>;
}

pub fn deadline_key(occurrence: OccurrenceId) -> String {
    format!("deadline-passed:{occurrence}")
}

pub fn advisory_key(occurrence: OccurrenceId) -> String {
    format!("staffing-advisory:{occurrence}")
}

#[derive(Debug, Clone, Copy)]
struct LedgerEntry {
    recorded_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Process-local ledger.
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    entries: Arc<Mutex<HashMap<String, LedgerEntry>>>,
}

impl MemoryLedger {
    pub fn len(&self) -> usize {
        self.entries.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, LedgerEntry>>, RepositoryError> {
        self.entries
            .lock()
            .map_err(|_| RepositoryError::Unavailable("ledger mutex poisoned".to_string()))
    }
}

impl IdempotencyLedger for MemoryLedger {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.recorded_at))
    }

    fn set(&self, key: &str, now: DateTime<Utc>, ttl: Duration) -> Result<(), RepositoryError> {
        let mut guard = self.lock()?;
        guard.insert(
            key.to_string(),
            LedgerEntry {
                recorded_at: now,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    fn evict(&self, now: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut guard = self.lock()?;
        let before = guard.len();
        guard.retain(|_, entry| entry.expires_at > now);
        Ok(before - guard.len())
    }
}
