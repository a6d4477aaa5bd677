//! Error types for coordinated execution.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::fingerprint::FingerprintError;
use crate::key::DedupKey;
use crate::record::ClaimStatus;
use crate::store::StoreError;

/// Result type for coordinated execution of an action failing with `E`.
pub type ExecuteResult<T, E> = std::result::Result<T, ExecuteError<E>>;

/// Errors returned by the coordinator.
///
/// Action errors are carried unchanged in [`ExecuteError::ActionFailed`];
/// display and source are the action's own.
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    /// An unexpired claim already exists for the key.
    #[error("operation '{key}' is already {status} (claimed at {created_at})")]
    DuplicateOperation {
        key: DedupKey,
        created_at: DateTime<Utc>,
        status: ClaimStatus,
    },

    /// The store could not confirm uniqueness; the action was not run.
    #[error("idempotency store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// The payload could not be fingerprinted; the action was not run.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[source] FingerprintError),

    /// A stored response could not be decoded into the expected type.
    #[error("stored response for '{key}' could not be replayed: {reason}")]
    ReplayDecode { key: DedupKey, reason: String },

    /// The wrapped action failed. Its claim has been released.
    #[error(transparent)]
    ActionFailed(E),
}

impl<E> ExecuteError<E> {
    /// Check if this is a duplicate submission ("still processing").
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateOperation { .. })
    }

    /// Original claim time of a duplicate.
    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DuplicateOperation { created_at, .. } => Some(*created_at),
            _ => None,
        }
    }

    /// Get the action's error, if the action itself failed.
    pub fn action_error(&self) -> Option<&E> {
        match self {
            Self::ActionFailed(err) => Some(err),
            _ => None,
        }
    }

    /// Take the action's error, if the action itself failed.
    pub fn into_action_error(self) -> Option<E> {
        match self {
            Self::ActionFailed(err) => Some(err),
            _ => None,
        }
    }
}
