//! Payload fingerprinting for dedup key generation.
//!
//! A fingerprint is a short, deterministic digest of a structured payload.
//! Payloads are converted to JSON and written in a canonical form with
//! object keys sorted at every nesting level, so two payloads with the same
//! content produce the same fingerprint regardless of key insertion order.
//! The canonical bytes are hashed with SHA-256; the first eight digest
//! bytes are rendered in base-36.
//!
//! This is a deduplication heuristic, not a security boundary: collisions
//! are possible, only improbable.

use std::fmt::{self, Write as _};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Number of leading digest bytes kept in a fingerprint.
const DIGEST_PREFIX_LEN: usize = 8;

/// Canonical encoding of an absent payload. Never valid JSON, so it cannot
/// collide with the encoding of any actual value.
const ABSENT_MARKER: &str = "undefined";

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Errors raised while fingerprinting a payload.
#[derive(Debug, Error)]
pub enum FingerprintError {
    /// The payload could not be represented as JSON.
    #[error("payload is not JSON-serializable: {reason}")]
    NotSerializable { reason: String },
}

/// Short deterministic digest of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of an absent (missing / undefined) payload.
    #[must_use]
    pub fn absent() -> Self {
        Self::from_canonical(ABSENT_MARKER)
    }

    /// Get the fingerprint token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_canonical(canonical: &str) -> Self {
        Self(to_base36(digest_prefix(canonical.as_bytes())))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint any serializable payload.
///
/// # Errors
///
/// Returns `FingerprintError::NotSerializable` if the value cannot be
/// converted to JSON (for example a map with non-string keys).
///
/// # Examples
///
/// ```
/// use artisan_idempotency::fingerprint::{fingerprint, fingerprint_value};
/// use serde_json::json;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let a = fingerprint_value(&json!({"a": 1, "b": {"x": true, "y": null}}));
/// let b = fingerprint(&json!({"b": {"y": null, "x": true}, "a": 1}))?;
/// assert_eq!(a, b);
/// # Ok(())
/// # }
/// ```
pub fn fingerprint<T: Serialize + ?Sized>(payload: &T) -> Result<Fingerprint, FingerprintError> {
    let value = serde_json::to_value(payload).map_err(|e| FingerprintError::NotSerializable {
        reason: e.to_string(),
    })?;
    Ok(fingerprint_value(&value))
}

/// Fingerprint a payload that may be absent.
///
/// `None` maps to [`Fingerprint::absent`], which differs from the
/// fingerprint of `null` and of `{}`.
///
/// # Errors
///
/// Returns `FingerprintError::NotSerializable` if a present value cannot be
/// converted to JSON.
pub fn fingerprint_optional<T: Serialize>(
    payload: Option<&T>,
) -> Result<Fingerprint, FingerprintError> {
    payload.map_or_else(|| Ok(Fingerprint::absent()), fingerprint)
}

/// Fingerprint an already-built JSON value.
#[must_use]
pub fn fingerprint_value(value: &Value) -> Fingerprint {
    Fingerprint::from_canonical(&canonical_json(value))
}

/// Render a JSON value with object keys sorted at every level.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            // Display for scalar values is compact JSON with proper escaping.
            let _ = write!(out, "{value}");
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (index, (key, item)) in map
                .iter()
                .sorted_by(|(a, _), (b, _)| a.cmp(b))
                .enumerate()
            {
                if index > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}", Value::from(key.as_str()));
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

/// SHA-256 of `bytes`, truncated to a big-endian `u64`.
#[inline]
fn digest_prefix(bytes: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest
        .first_chunk::<DIGEST_PREFIX_LEN>()
        .map_or(0, |prefix| u64::from_be_bytes(*prefix))
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::with_capacity(13);
    while value > 0 {
        let digit = usize::try_from(value % 36).unwrap_or_default();
        digits.push(BASE36_DIGITS.get(digit).copied().unwrap_or(b'0'));
        value /= 36;
    }
    digits.iter().rev().map(|d| char::from(*d)).collect()
}
