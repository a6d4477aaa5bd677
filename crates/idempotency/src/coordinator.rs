//! Exactly-once execution of side-effecting operations.
//!
//! The coordinator wraps a caller-supplied async action so that repeated or
//! concurrent invocations with the same `(owner, operation, payload)` inside
//! the TTL window run the action at most once.
//!
//! # Protocol
//!
//! ```text
//! key   = idem:<owner>:<operation>:<fingerprint(payload)>
//! claim = store.claim(key, record, ttl)       // atomic set-if-absent
//!   Existing  -> DuplicateOperation (action never runs)
//!   error     -> StoreUnavailable    (fail closed, action never runs)
//!   Claimed   -> run action
//!     Ok      -> Retain: keep claim until TTL | Release: delete claim
//!     Err(e)  -> delete claim, return ActionFailed(e)
//! ```
//!
//! Per key: `ABSENT -> CLAIMED -> { RELEASED | ABSENT after TTL | ABSENT }`.
//! A second claim while `CLAIMED` and unexpired is exactly what produces
//! [`ExecuteError::DuplicateOperation`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use artisan_idempotency::{
//!     ExecuteOptions, IdempotencyCoordinator, MemoryStore, OperationName, OwnerId,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = IdempotencyCoordinator::new(Arc::new(MemoryStore::new()));
//! let owner = OwnerId::user("u1")?;
//! let operation = OperationName::new("create-post")?;
//! let payload = json!({"text": "hi"});
//! let options = ExecuteOptions::default();
//!
//! let first = coordinator
//!     .execute_once(&owner, &operation, &payload, options, || async {
//!         Ok::<_, std::io::Error>("post-1")
//!     })
//!     .await;
//! assert_eq!(first.ok(), Some("post-1"));
//!
//! let second = coordinator
//!     .execute_once(&owner, &operation, &payload, options, || async {
//!         Ok::<_, std::io::Error>("post-2")
//!     })
//!     .await;
//! assert!(second.is_err_and(|e| e.is_duplicate()));
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::IdempotencyConfig;
use crate::error::{ExecuteError, ExecuteResult};
use crate::fingerprint::{FingerprintError, fingerprint};
use crate::key::{DedupKey, OperationName, OwnerId};
use crate::record::{ClaimStatus, IdempotencyRecord};
use crate::store::{ClaimOutcome, IdempotencyStore, StoreResult};

/// Default claim TTL (60 seconds).
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// What happens to a claim after its action succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessPolicy {
    /// Keep the claim until TTL expiry, rejecting replays in the window.
    #[default]
    Retain,
    /// Delete the claim immediately; only overlapping calls are deduplicated.
    Release,
}

/// Per-call options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Lifetime of the claim, anchored at claim time.
    pub ttl: Duration,
    pub on_success: SuccessPolicy,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            on_success: SuccessPolicy::default(),
        }
    }
}

impl ExecuteOptions {
    /// Options with the given TTL and the default success policy.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Self::default()
        }
    }

    /// Set the TTL.
    #[must_use]
    pub const fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the success policy.
    #[must_use]
    pub const fn on_success(mut self, policy: SuccessPolicy) -> Self {
        self.on_success = policy;
        self
    }
}

/// Outcome of [`IdempotencyCoordinator::execute_or_replay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution<T> {
    /// The action ran in this call.
    Fresh(T),
    /// A stored result from an earlier call in the TTL window.
    Replayed(T),
}

impl<T> Execution<T> {
    /// Check if the value was replayed.
    pub const fn is_replayed(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }

    /// Get the value regardless of origin.
    pub fn into_inner(self) -> T {
        match self {
            Self::Fresh(value) | Self::Replayed(value) => value,
        }
    }
}

/// Deduplicates side-effecting operations through an injected store.
#[derive(Clone)]
pub struct IdempotencyCoordinator {
    store: Arc<dyn IdempotencyStore>,
    clock: Arc<dyn Clock>,
    options: ExecuteOptions,
}

impl std::fmt::Debug for IdempotencyCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyCoordinator")
            .field("clock", &self.clock)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl IdempotencyCoordinator {
    /// Create a coordinator over `store` using wall-clock time.
    #[must_use]
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            options: ExecuteOptions::default(),
        }
    }

    /// Create a coordinator with defaults taken from configuration.
    #[must_use]
    pub fn from_config(store: Arc<dyn IdempotencyStore>, config: &IdempotencyConfig) -> Self {
        Self::new(store).with_options(config.execute_options())
    }

    /// Use `clock` for claim timestamps. It should match the store's clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the default options returned by [`options`](Self::options).
    #[must_use]
    pub const fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    /// Configured default options.
    #[must_use]
    pub const fn options(&self) -> ExecuteOptions {
        self.options
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn IdempotencyStore> {
        &self.store
    }

    /// Run `action` at most once per `(owner, operation, payload)` per TTL.
    ///
    /// # Errors
    ///
    /// - `DuplicateOperation` if an unexpired claim exists; `action` is not run.
    /// - `StoreUnavailable` if the claim could not be confirmed; `action` is
    ///   not run.
    /// - `InvalidPayload` if the payload cannot be fingerprinted.
    /// - `ActionFailed` carrying the action's own error, after the claim has
    ///   been released so that a retry can proceed.
    pub async fn execute_once<P, F, Fut, T, E>(
        &self,
        owner: &OwnerId,
        operation: &OperationName,
        payload: &P,
        options: ExecuteOptions,
        action: F,
    ) -> ExecuteResult<T, E>
    where
        P: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let (key, record) = self
            .prepare(owner, operation, payload)
            .map_err(ExecuteError::<E>::InvalidPayload)?;

        if let ClaimOutcome::Existing(existing) = self
            .claim(&key, record.clone(), options.ttl)
            .await
            .map_err(ExecuteError::<E>::StoreUnavailable)?
        {
            return Err(duplicate(key, &existing));
        }

        match action().await {
            Ok(value) => {
                if options.on_success == SuccessPolicy::Release {
                    self.release(&key, &record, "success").await;
                }
                Ok(value)
            }
            Err(err) => {
                self.release(&key, &record, "action failed").await;
                Err(ExecuteError::ActionFailed(err))
            }
        }
    }

    /// Run `action` once per TTL window and replay its stored result to
    /// later callers in the window.
    ///
    /// A call that finds the operation still in progress gets
    /// `DuplicateOperation`; a call that finds it completed gets
    /// [`Execution::Replayed`] without running `action`.
    ///
    /// # Errors
    ///
    /// As [`execute_once`](Self::execute_once), plus `ReplayDecode` if a
    /// stored result no longer decodes into `T`.
    pub async fn execute_or_replay<P, F, Fut, T, E>(
        &self,
        owner: &OwnerId,
        operation: &OperationName,
        payload: &P,
        ttl: Duration,
        action: F,
    ) -> ExecuteResult<Execution<T>, E>
    where
        P: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize + DeserializeOwned,
    {
        let (key, record) = self
            .prepare(owner, operation, payload)
            .map_err(ExecuteError::<E>::InvalidPayload)?;

        if let ClaimOutcome::Existing(existing) = self
            .claim(&key, record.clone(), ttl)
            .await
            .map_err(ExecuteError::<E>::StoreUnavailable)?
        {
            return replay(key, existing);
        }

        match action().await {
            Ok(value) => {
                self.store_response(&key, record, ttl, &value).await;
                Ok(Execution::Fresh(value))
            }
            Err(err) => {
                self.release(&key, &record, "action failed").await;
                Err(ExecuteError::ActionFailed(err))
            }
        }
    }

    fn prepare<P>(
        &self,
        owner: &OwnerId,
        operation: &OperationName,
        payload: &P,
    ) -> Result<(DedupKey, IdempotencyRecord), FingerprintError>
    where
        P: Serialize + ?Sized,
    {
        let fingerprint = fingerprint(payload)?;
        let record = IdempotencyRecord::in_progress(
            owner.clone(),
            operation.clone(),
            fingerprint,
            self.clock.now(),
        );
        Ok((record.dedup_key(), record))
    }

    async fn claim(
        &self,
        key: &DedupKey,
        record: IdempotencyRecord,
        ttl: Duration,
    ) -> StoreResult<ClaimOutcome> {
        match self.store.claim(key, record, ttl).await {
            Ok(ClaimOutcome::Claimed) => {
                debug!(key = %key, ttl = ?ttl, "Claimed operation");
                Ok(ClaimOutcome::Claimed)
            }
            Ok(ClaimOutcome::Existing(existing)) => {
                debug!(
                    key = %key,
                    status = %existing.status,
                    claimed_at = %existing.created_at,
                    "Operation already claimed"
                );
                Ok(ClaimOutcome::Existing(existing))
            }
            Err(err) => {
                warn!(key = %key, error = %err, "Store unavailable, refusing to run operation");
                Err(err)
            }
        }
    }

    /// Best-effort removal of our own claim; failures are logged, never
    /// surfaced. A key that expired and was claimed by another caller while
    /// the action ran is left alone.
    async fn release(&self, key: &DedupKey, claim: &IdempotencyRecord, reason: &'static str) {
        match self.store.release_claim(key, claim).await {
            Ok(true) => debug!(key = %key, reason, "Released claim"),
            Ok(false) => debug!(
                key = %key,
                reason,
                "Claim expired before release, leaving the key to its current holder"
            ),
            Err(err) => warn!(
                key = %key,
                reason,
                error = %err,
                "Failed to release claim, it will expire at TTL"
            ),
        }
    }

    /// Best-effort result storage; on failure the in-progress claim stays.
    async fn store_response<T: Serialize>(
        &self,
        key: &DedupKey,
        record: IdempotencyRecord,
        ttl: Duration,
        value: &T,
    ) {
        let response = match serde_json::to_value(value) {
            Ok(response) => response,
            Err(err) => {
                warn!(key = %key, error = %err, "Result is not serializable, replay disabled");
                return;
            }
        };

        match self.store.complete_claim(key, record.complete(response), ttl).await {
            Ok(true) => debug!(key = %key, "Stored result for replay"),
            Ok(false) => debug!(key = %key, "Claim expired before completion, result not stored"),
            Err(err) => warn!(key = %key, error = %err, "Failed to store result for replay"),
        }
    }
}

fn duplicate<E>(key: DedupKey, existing: &IdempotencyRecord) -> ExecuteError<E> {
    ExecuteError::DuplicateOperation {
        key,
        created_at: existing.created_at,
        status: existing.status,
    }
}

fn replay<T, E>(key: DedupKey, existing: IdempotencyRecord) -> ExecuteResult<Execution<T>, E>
where
    T: DeserializeOwned,
{
    match (existing.status, existing.response) {
        (ClaimStatus::Completed, Some(response)) => serde_json::from_value(response)
            .map(Execution::Replayed)
            .map_err(|err| ExecuteError::ReplayDecode {
                key,
                reason: err.to_string(),
            }),
        (status, _) => Err(ExecuteError::DuplicateOperation {
            key,
            created_at: existing.created_at,
            status,
        }),
    }
}
