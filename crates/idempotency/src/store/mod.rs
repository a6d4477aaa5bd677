//! Storage traits for idempotency records.
//!
//! A store maps dedup keys to records with expiry. The coordinator only ever
//! goes through this trait, so a memory map, a cache, or a networked store
//! can be swapped in without touching coordinator logic.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::clock::expiry_after;
use crate::key::DedupKey;
use crate::record::IdempotencyRecord;

pub mod cache;
pub mod memory;

pub use cache::CacheStore;
pub use memory::MemoryStore;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Get,
    Set,
    Claim,
    Delete,
    Sweep,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Claim => "claim",
            Self::Delete => "delete",
            Self::Sweep => "sweep",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by a store backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend could not be reached or refused the operation.
    #[error("store {operation} failed for key '{key}': {reason}")]
    Unavailable {
        operation: StoreOperation,
        key: String,
        reason: String,
    },

    /// The backend returned data that does not decode into a record.
    #[error("store entry for key '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    /// Create a corrupt-entry error.
    pub fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an unavailable error.
    pub fn unavailable(
        operation: StoreOperation,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Unavailable {
            operation,
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result of an atomic claim attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The record was written; the caller owns the key.
    Claimed,
    /// An unexpired record already holds the key.
    Existing(IdempotencyRecord),
}

/// Trait for idempotency storage backends.
///
/// Implementations must enforce expiry on every read independently of
/// [`sweep`](IdempotencyStore::sweep): an entry whose expiry has passed is
/// absent even if it is still physically stored.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Load the unexpired record for a key.
    async fn get(&self, key: &DedupKey) -> StoreResult<Option<IdempotencyRecord>>;

    /// Store or overwrite a record, expiring at `record.created_at + ttl`.
    async fn set(&self, key: &DedupKey, record: IdempotencyRecord, ttl: Duration)
    -> StoreResult<()>;

    /// Write the record only if no unexpired record exists for the key.
    ///
    /// The default is a `get` followed by a `set`, which is NOT atomic: two
    /// concurrent callers can both observe the key as free. Backends with a
    /// conditional write must override this so the write itself is the
    /// linearization point.
    async fn claim(
        &self,
        key: &DedupKey,
        record: IdempotencyRecord,
        ttl: Duration,
    ) -> StoreResult<ClaimOutcome> {
        if let Some(existing) = self.get(key).await? {
            return Ok(ClaimOutcome::Existing(existing));
        }
        self.set(key, record, ttl).await?;
        Ok(ClaimOutcome::Claimed)
    }

    /// Remove the key only while it holds an unexpired record carrying
    /// `claim`'s token. Returns whether a record was removed.
    ///
    /// The default is a `get` followed by a `delete` and is NOT atomic.
    async fn release_claim(
        &self,
        key: &DedupKey,
        claim: &IdempotencyRecord,
    ) -> StoreResult<bool> {
        match self.get(key).await? {
            Some(current) if current.same_claim(claim) => {
                self.delete(key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Overwrite the key with `record` only while it holds an unexpired
    /// record carrying the same claim token. Returns whether it was written.
    ///
    /// The default is a `get` followed by a `set` and is NOT atomic.
    async fn complete_claim(
        &self,
        key: &DedupKey,
        record: IdempotencyRecord,
        ttl: Duration,
    ) -> StoreResult<bool> {
        match self.get(key).await? {
            Some(current) if current.same_claim(&record) => {
                self.set(key, record, ttl).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Remove a key unconditionally. Removing an absent key is not an error.
    async fn delete(&self, key: &DedupKey) -> StoreResult<()>;

    /// Remove every expired entry, returning how many were removed.
    ///
    /// Must never remove an unexpired entry.
    async fn sweep(&self) -> StoreResult<usize>;

    /// Number of physically stored entries, expired ones included.
    async fn len(&self) -> StoreResult<usize>;

    /// Check if nothing is physically stored.
    async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Record plus its absolute expiry, as held by the in-process stores.
#[derive(Debug, Clone)]
pub(crate) struct StoredEntry {
    pub(crate) record: IdempotencyRecord,
    pub(crate) expires_at: DateTime<Utc>,
}

impl StoredEntry {
    pub(crate) fn new(record: IdempotencyRecord, ttl: Duration) -> Self {
        let expires_at = expiry_after(record.created_at, ttl);
        Self { record, expires_at }
    }

    pub(crate) fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether this entry is the live record of `claim`.
    pub(crate) fn is_live_claim(&self, claim: &IdempotencyRecord, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && self.record.same_claim(claim)
    }

    /// Time left until expiry as seen at `now`, zero once expired.
    pub(crate) fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}
