//! Exactly-once coordination for side-effecting operations.
//!
//! Clients retry. Networks drop responses. Users double-click. This crate
//! suppresses the duplicate work those produce:
//!
//! - **Fingerprinting**: a deterministic, key-order-independent digest of a
//!   structured payload ([`fingerprint`]).
//! - **Dedup keys**: `idem:<owner>:<operation>:<fingerprint>` scoping
//!   ([`DedupKey`]).
//! - **TTL stores**: a pluggable [`IdempotencyStore`] with an in-memory map
//!   ([`MemoryStore`]) and a capacity-limited cache
//!   ([`CacheStore`]) that refuses new keys when full.
//! - **Coordinator**: [`IdempotencyCoordinator::execute_once`] claims the key,
//!   runs the action at most once per TTL window, and releases the claim on
//!   failure so the caller can retry.
//! - **Replay**: [`IdempotencyCoordinator::execute_or_replay`] returns a stored
//!   result to later callers instead of rejecting them.
//! - **Sweeper**: [`SweepTask`] reclaims expired records in the background.
//!
//! Store failures during the claim fail closed: the action is not run.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod key;
pub mod record;
pub mod store;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, IdempotencyConfig, StoreBackend};
pub use coordinator::{
    DEFAULT_TTL, ExecuteOptions, Execution, IdempotencyCoordinator, SuccessPolicy,
};
pub use error::{ExecuteError, ExecuteResult};
pub use fingerprint::{
    Fingerprint, FingerprintError, canonical_json, fingerprint, fingerprint_optional,
    fingerprint_value,
};
pub use key::{DedupKey, KeyError, OperationName, OwnerId};
pub use record::{ClaimStatus, IdempotencyRecord};
pub use store::{
    CacheStore, ClaimOutcome, IdempotencyStore, MemoryStore, StoreError, StoreOperation,
    StoreResult,
};
pub use sweeper::{SweepError, SweepTask, sweep_once};
