//! Idempotency records held by stores.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::fingerprint::Fingerprint;
use crate::key::{DedupKey, OperationName, OwnerId};

/// Lifecycle status of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    /// The action is running (or ran without a stored result).
    InProgress,
    /// The action completed and its result is stored for replay.
    Completed,
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => f.write_str("in_progress"),
            Self::Completed => f.write_str("completed"),
        }
    }
}

/// Reservation of a dedup key for one logical operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Unique per claim attempt. Release and completion only act on the
    /// record whose token they hold.
    pub claim_id: Ulid,
    pub owner_id: OwnerId,
    pub operation_name: OperationName,
    pub payload_fingerprint: Fingerprint,
    pub created_at: DateTime<Utc>,
    pub status: ClaimStatus,
    /// Stored result of a replayable operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

impl IdempotencyRecord {
    /// Create an in-progress record with a fresh claim token.
    #[must_use]
    pub fn in_progress(
        owner_id: OwnerId,
        operation_name: OperationName,
        payload_fingerprint: Fingerprint,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            claim_id: Ulid::new(),
            owner_id,
            operation_name,
            payload_fingerprint,
            created_at,
            status: ClaimStatus::InProgress,
            response: None,
        }
    }

    /// Mark completed with a stored response. `created_at` is unchanged so
    /// the TTL stays anchored at the original claim.
    #[must_use]
    pub fn complete(self, response: serde_json::Value) -> Self {
        Self {
            status: ClaimStatus::Completed,
            response: Some(response),
            ..self
        }
    }

    /// Check whether `other` was produced by the same claim.
    #[must_use]
    pub fn same_claim(&self, other: &Self) -> bool {
        self.claim_id == other.claim_id
    }

    /// Key this record is stored under.
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(
            &self.owner_id,
            &self.operation_name,
            &self.payload_fingerprint,
        )
    }
}
