//! Transfer keys
//!
//! A key is the only identifier ever handed to untrusted clients. Keys are
//! random version 4 UUIDs in canonical hyphenated lowercase form: 36
//! URL-safe characters with no relation to the object's id, its storage
//! name, or its content.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of a key in its canonical textual form
pub const KEY_LENGTH: usize = 36;

/// Error returned when a string is not a well-formed key
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// Not a UUID at all
    #[error("malformed transfer key")]
    Malformed,
    /// A UUID, but not a random (v4) one
    #[error("transfer key has the wrong version")]
    WrongVersion,
    /// A v4 UUID, but not spelled in canonical form
    #[error("transfer key is not in canonical form")]
    NotCanonical,
}

/// Opaque, unguessable client-facing object key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransferKey(String);

impl TransferKey {
    /// Generate a fresh key from the operating system's entropy source
    ///
    /// Takes no input on purpose: keys must never correlate with content.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    /// Parse a key supplied by a client
    ///
    /// Only the canonical spelling is accepted, so one object can never be
    /// addressed by two different strings.
    ///
    /// # Errors
    ///
    /// Returns a `KeyError` describing why the string is not a key.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        if s.len() != KEY_LENGTH {
            return Err(KeyError::Malformed);
        }
        let uuid = Uuid::parse_str(s).map_err(|_| KeyError::Malformed)?;
        if uuid.get_version_num() != 4 {
            return Err(KeyError::WrongVersion);
        }
        let canonical = uuid.hyphenated().to_string();
        if canonical != s {
            return Err(KeyError::NotCanonical);
        }
        Ok(Self(canonical))
    }

    /// Borrow the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TransferKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TransferKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TransferKey> for String {
    fn from(key: TransferKey) -> Self {
        key.0
    }
}

impl AsRef<str> for TransferKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
