//! Cache store with native per-entry expiry.
//!
//! Backed by a `moka` cache. Claims, conditional releases and sweeps use
//! moka's atomic per-key compute, the same shape as a conditional write on a
//! networked cache. Expiry is checked against the injected clock on every
//! read, and moka's own eviction deadline is the entry's remaining lifetime
//! measured on that clock when the entry was written.
//!
//! The cache has no size-based eviction, so a live claim is only ever
//! removed by expiry or its owner. Capacity is enforced at insert time
//! instead: a new key that would exceed it is refused with
//! [`StoreError::Unavailable`], after expired entries have been reclaimed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::Expiry;
use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;
use tracing::warn;

use super::{ClaimOutcome, IdempotencyStore, StoreError, StoreOperation, StoreResult, StoredEntry};
use crate::clock::{Clock, SystemClock};
use crate::key::DedupKey;
use crate::record::IdempotencyRecord;

/// Default maximum number of entries held by a [`CacheStore`].
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Stored entry plus the lifetime moka should give it.
#[derive(Debug, Clone)]
struct CachedEntry {
    entry: StoredEntry,
    lifetime: Duration,
}

/// Evicts an entry once the lifetime computed at write time has passed.
struct EntryExpiry;

impl Expiry<String, CachedEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.lifetime)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.lifetime)
    }
}

/// Cache-backed store implementation.
pub struct CacheStore {
    cache: Cache<String, CachedEntry>,
    capacity: u64,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Create a store holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    /// Create a store using the given clock for expiry.
    #[must_use]
    pub fn with_clock(capacity: u64, clock: Arc<dyn Clock>) -> Self {
        let cache = Cache::builder().expire_after(EntryExpiry).build();
        Self {
            cache,
            capacity,
            clock,
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    fn cached(&self, record: IdempotencyRecord, ttl: Duration) -> CachedEntry {
        let entry = StoredEntry::new(record, ttl);
        let lifetime = entry.remaining(self.clock.now());
        CachedEntry { entry, lifetime }
    }

    /// Fails when inserting `key` would grow the cache past capacity.
    fn ensure_room(
        &self,
        key: &DedupKey,
        operation: StoreOperation,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        if self.cache.contains_key(key.as_str()) {
            return Ok(());
        }

        self.cache.run_pending_tasks();
        if self.cache.entry_count() < self.capacity {
            return Ok(());
        }

        if self.remove_expired(now) > 0 {
            self.cache.run_pending_tasks();
        }
        if self.cache.entry_count() < self.capacity {
            return Ok(());
        }

        let capacity = self.capacity;
        warn!(key = %key, capacity, "Cache store is full");
        Err(StoreError::unavailable(
            operation,
            key.as_str(),
            format!("cache is full ({capacity} entries)"),
        ))
    }

    /// Remove logically expired entries, returning how many were removed.
    fn remove_expired(&self, now: DateTime<Utc>) -> usize {
        let candidates: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(_, cached)| cached.entry.is_expired(now))
            .map(|(key, _)| key)
            .collect();

        // Re-check each candidate atomically; a fresh claim may have
        // replaced it since the scan.
        candidates
            .into_iter()
            .filter(|key| {
                let result = self
                    .cache
                    .entry(key.as_ref().clone())
                    .and_compute_with(|current| match current {
                        Some(cached) if cached.value().entry.is_expired(now) => Op::Remove,
                        _ => Op::Nop,
                    });
                matches!(result, CompResult::Removed(_))
            })
            .count()
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entry_count", &self.cache.entry_count())
            .field("capacity", &self.capacity)
            .field("clock", &self.clock)
            .finish()
    }
}

#[async_trait]
impl IdempotencyStore for CacheStore {
    async fn get(&self, key: &DedupKey) -> StoreResult<Option<IdempotencyRecord>> {
        let now = self.clock.now();
        Ok(self
            .cache
            .get(key.as_str())
            .filter(|cached| !cached.entry.is_expired(now))
            .map(|cached| cached.entry.record))
    }

    async fn set(
        &self,
        key: &DedupKey,
        record: IdempotencyRecord,
        ttl: Duration,
    ) -> StoreResult<()> {
        self.ensure_room(key, StoreOperation::Set, self.clock.now())?;
        self.cache.insert(key.to_string(), self.cached(record, ttl));
        Ok(())
    }

    async fn claim(
        &self,
        key: &DedupKey,
        record: IdempotencyRecord,
        ttl: Duration,
    ) -> StoreResult<ClaimOutcome> {
        let now = self.clock.now();
        self.ensure_room(key, StoreOperation::Claim, now)?;
        let candidate = self.cached(record, ttl);

        let outcome = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|current| match current {
                Some(cached) if !cached.value().entry.is_expired(now) => Op::Nop,
                _ => Op::Put(candidate),
            });

        match outcome {
            CompResult::Unchanged(cached) => {
                Ok(ClaimOutcome::Existing(cached.into_value().entry.record))
            }
            CompResult::Inserted(_)
            | CompResult::ReplacedWith(_)
            | CompResult::Removed(_)
            | CompResult::StillNone(_) => Ok(ClaimOutcome::Claimed),
        }
    }

    async fn release_claim(
        &self,
        key: &DedupKey,
        claim: &IdempotencyRecord,
    ) -> StoreResult<bool> {
        let now = self.clock.now();
        let outcome = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|current| match current {
                Some(cached) if cached.value().entry.is_live_claim(claim, now) => Op::Remove,
                _ => Op::Nop,
            });
        Ok(matches!(outcome, CompResult::Removed(_)))
    }

    async fn complete_claim(
        &self,
        key: &DedupKey,
        record: IdempotencyRecord,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now = self.clock.now();
        let claim = record.clone();
        let replacement = self.cached(record, ttl);
        let outcome = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|current| match current {
                Some(cached) if cached.value().entry.is_live_claim(&claim, now) => {
                    Op::Put(replacement)
                }
                _ => Op::Nop,
            });
        Ok(matches!(outcome, CompResult::ReplacedWith(_)))
    }

    async fn delete(&self, key: &DedupKey) -> StoreResult<()> {
        self.cache.invalidate(key.as_str());
        Ok(())
    }

    async fn sweep(&self) -> StoreResult<usize> {
        let removed = self.remove_expired(self.clock.now());
        self.cache.run_pending_tasks();
        Ok(removed)
    }

    async fn len(&self) -> StoreResult<usize> {
        self.cache.run_pending_tasks();
        Ok(usize::try_from(self.cache.entry_count()).unwrap_or(usize::MAX))
    }
}
