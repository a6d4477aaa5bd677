//! In-memory store backed by a single locked map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ClaimOutcome, IdempotencyStore, StoreResult, StoredEntry};
use crate::clock::{Clock, SystemClock};
use crate::key::DedupKey;
use crate::record::IdempotencyRecord;

/// In-memory store implementation.
///
/// Claims, conditional releases and sweeps each run under one write guard,
/// which makes the check-and-write atomic on a multi-threaded runtime.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create a store using wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store using the given clock for expiry checks.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn get(&self, key: &DedupKey) -> StoreResult<Option<IdempotencyRecord>> {
        let now = self.clock.now();
        Ok(self
            .entries
            .read()
            .await
            .get(key.as_str())
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.record.clone()))
    }

    async fn set(
        &self,
        key: &DedupKey,
        record: IdempotencyRecord,
        ttl: Duration,
    ) -> StoreResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), StoredEntry::new(record, ttl));
        Ok(())
    }

    async fn claim(
        &self,
        key: &DedupKey,
        record: IdempotencyRecord,
        ttl: Duration,
    ) -> StoreResult<ClaimOutcome> {
        let mut entries = self.entries.write().await;
        let now = self.clock.now();

        if let Some(existing) = entries
            .get(key.as_str())
            .filter(|entry| !entry.is_expired(now))
        {
            return Ok(ClaimOutcome::Existing(existing.record.clone()));
        }

        entries.insert(key.to_string(), StoredEntry::new(record, ttl));
        Ok(ClaimOutcome::Claimed)
    }

    async fn release_claim(
        &self,
        key: &DedupKey,
        claim: &IdempotencyRecord,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        let now = self.clock.now();

        let held = entries
            .get(key.as_str())
            .is_some_and(|entry| entry.is_live_claim(claim, now));
        if held {
            entries.remove(key.as_str());
        }
        Ok(held)
    }

    async fn complete_claim(
        &self,
        key: &DedupKey,
        record: IdempotencyRecord,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.write().await;
        let now = self.clock.now();

        match entries.get_mut(key.as_str()) {
            Some(entry) if entry.is_live_claim(&record, now) => {
                *entry = StoredEntry::new(record, ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &DedupKey) -> StoreResult<()> {
        self.entries.write().await.remove(key.as_str());
        Ok(())
    }

    async fn sweep(&self) -> StoreResult<usize> {
        let mut entries = self.entries.write().await;
        let now = self.clock.now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before.saturating_sub(entries.len()))
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.entries.read().await.len())
    }
}
