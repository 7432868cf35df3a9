//! Machine-readable error kinds
//!
//! These are serialized to strings in `ServerMessage::Error`, so clients can
//! tell a missing object from a server-side integrity problem without
//! parsing human-readable text.

use std::fmt;

/// Error kinds reported on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input: empty or oversized upload, malformed name or request
    Invalid,
    /// Unknown key or id; never distinguishes deleted from never-existed
    NotFound,
    /// Storage substrate failed (disk full, permission denied, broken pipe)
    IoError,
    /// Ledger and storage disagree; needs operator attention
    Integrity,
    /// Client sent something the protocol does not allow
    ProtocolError,
    /// Per-IP or size limit reached
    Limit,
    /// Anything else (database failure, key generation exhausted)
    Internal,
}

impl ErrorKind {
    /// Convert to the string representation used in protocol messages
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::NotFound => "not_found",
            Self::IoError => "io_error",
            Self::Integrity => "integrity",
            Self::ProtocolError => "protocol_error",
            Self::Limit => "limit",
            Self::Internal => "internal",
        }
    }

    /// Parse from string (for client-side handling)
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "invalid" => Some(Self::Invalid),
            "not_found" => Some(Self::NotFound),
            "io_error" => Some(Self::IoError),
            "integrity" => Some(Self::Integrity),
            "protocol_error" => Some(Self::ProtocolError),
            "limit" => Some(Self::Limit),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.as_str().to_string()
    }
}
