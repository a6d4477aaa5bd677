//! Dedup key construction from caller identity, operation name, and payload.
//!
//! A dedup key is rendered as `idem:<owner>:<operation>:<fingerprint>`.
//! Neither the operation name nor the fingerprint may contain `:`, so the
//! rendering is unambiguous even when a user id does.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::{Fingerprint, FingerprintError, fingerprint};

const KEY_PREFIX: &str = "idem";
const ANONYMOUS: &str = "anonymous";

/// Maximum length of an operation name in bytes.
pub const MAX_OPERATION_NAME_LEN: usize = 128;

/// Errors raised when building key components.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("owner id must not be empty")]
    EmptyOwner,

    #[error("operation name must not be empty")]
    EmptyOperation,

    #[error("operation name is {len} bytes, exceeding the {max} byte limit")]
    OperationTooLong { len: usize, max: usize },

    #[error("operation name '{name}' contains invalid character '{ch}'")]
    InvalidOperationChar { name: String, ch: char },
}

/// Identity of the caller issuing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum OwnerId {
    /// An authenticated user.
    User(String),
    /// A caller without an identity.
    Anonymous,
}

impl OwnerId {
    /// Create a user owner.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::EmptyOwner` if the id is empty.
    pub fn user(id: impl Into<String>) -> Result<Self, KeyError> {
        let id = id.into();
        if id.is_empty() {
            return Err(KeyError::EmptyOwner);
        }
        Ok(Self::User(id))
    }

    /// Owner from an optional user id; `None` is anonymous.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::EmptyOwner` if a present id is empty.
    pub fn from_optional(id: Option<&str>) -> Result<Self, KeyError> {
        id.map_or(Ok(Self::Anonymous), Self::user)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user/{id}"),
            Self::Anonymous => f.write_str(ANONYMOUS),
        }
    }
}

/// Tag identifying a logical action, e.g. `create-post` or `checkout`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperationName(String);

impl OperationName {
    /// Create a validated operation name.
    ///
    /// Allowed characters are ASCII alphanumerics, `-`, `_` and `.`.
    ///
    /// # Errors
    ///
    /// Returns a `KeyError` if the name is empty, too long, or contains a
    /// disallowed character.
    pub fn new(name: impl Into<String>) -> Result<Self, KeyError> {
        let name = name.into();

        if name.is_empty() {
            return Err(KeyError::EmptyOperation);
        }

        if name.len() > MAX_OPERATION_NAME_LEN {
            return Err(KeyError::OperationTooLong {
                len: name.len(),
                max: MAX_OPERATION_NAME_LEN,
            });
        }

        if let Some(ch) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(KeyError::InvalidOperationChar { name, ch });
        }

        Ok(Self(name))
    }

    /// Get the operation name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OperationName {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OperationName> for String {
    fn from(value: OperationName) -> Self {
        value.0
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Composite `(owner, operation, fingerprint)` lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    /// Build the key from its components.
    #[must_use]
    pub fn new(owner: &OwnerId, operation: &OperationName, fingerprint: &Fingerprint) -> Self {
        Self(format!("{KEY_PREFIX}:{owner}:{operation}:{fingerprint}"))
    }

    /// Fingerprint the payload and build the key.
    ///
    /// # Errors
    ///
    /// Returns `FingerprintError` if the payload cannot be serialized.
    pub fn for_payload<T: Serialize + ?Sized>(
        owner: &OwnerId,
        operation: &OperationName,
        payload: &T,
    ) -> Result<Self, FingerprintError> {
        Ok(Self::new(owner, operation, &fingerprint(payload)?))
    }

    /// Get the rendered key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DedupKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
