//! Transfer error taxonomy
//!
//! Every failure a transfer flow or administrative action can produce, with
//! its stable wire kind and the text a client is allowed to see.

use keydrop_common::ErrorKind;
use keydrop_common::TransferKey;
use keydrop_common::validators::{DisplayNameError, SearchQueryError};

use crate::constants::{ERR_INTERNAL, ERR_NOT_FOUND};
use crate::store::StoreError;

/// Input rejected before any storage or ledger mutation
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("empty files cannot be uploaded")]
    Empty,

    #[error("file exceeds the maximum upload size of {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("{0}")]
    Name(DisplayNameError),

    #[error("{0}")]
    Query(SearchQueryError),
}

/// Errors from the transfer coordinator
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Unknown key or id
    #[error("not found")]
    NotFound,

    /// Writing a new object failed; no ledger row was created
    #[error("failed to store object: {0}")]
    StoreWrite(#[source] StoreError),

    /// Reading a stored object failed mid-stream
    #[error("failed to read object: {0}")]
    StoreRead(#[source] StoreError),

    /// The ledger has a row whose bytes are gone (or truncated)
    #[error("object {key} is recorded but its bytes are missing at {location}")]
    ObjectMissing { key: TransferKey, location: String },

    /// The uploading client's stream failed or ended early
    #[error("upload stream failed: {0}")]
    Source(#[source] std::io::Error),

    /// The downloading client's connection failed
    #[error("download stream failed: {0}")]
    Sink(#[source] std::io::Error),

    #[error("could not allocate a unique key after {attempts} attempts")]
    KeyGeneration { attempts: u32 },

    #[error("ledger error: {0}")]
    Ledger(#[from] sqlx::Error),

    /// A delete found only one half of an object
    #[error("object {id} was inconsistent (row removed: {row_removed}, bytes removed: {bytes_removed})")]
    Inconsistent {
        id: i64,
        row_removed: bool,
        bytes_removed: bool,
    },
}

impl TransferError {
    /// Wire kind reported to clients
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(ValidationError::TooLarge { .. }) => ErrorKind::Limit,
            Self::Validation(_) => ErrorKind::Invalid,
            Self::NotFound => ErrorKind::NotFound,
            Self::StoreWrite(_) | Self::StoreRead(_) | Self::Source(_) | Self::Sink(_) => {
                ErrorKind::IoError
            }
            Self::ObjectMissing { .. } | Self::Inconsistent { .. } => ErrorKind::Integrity,
            Self::KeyGeneration { .. } | Self::Ledger(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show a client
    ///
    /// Internal details (paths, database errors) stay in the server log.
    pub fn client_message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::NotFound => ERR_NOT_FOUND.to_string(),
            Self::StoreWrite(_) => "The file could not be stored".to_string(),
            Self::StoreRead(_) | Self::ObjectMissing { .. } => {
                "The file is recorded but its content is unavailable".to_string()
            }
            Self::Source(_) => "The upload stream ended early or failed".to_string(),
            Self::Sink(_) => "The download connection failed".to_string(),
            Self::Inconsistent { .. } => {
                "The object was only partially present; see server log".to_string()
            }
            Self::KeyGeneration { .. } | Self::Ledger(_) => ERR_INTERNAL.to_string(),
        }
    }
}

impl From<DisplayNameError> for TransferError {
    fn from(e: DisplayNameError) -> Self {
        Self::Validation(ValidationError::Name(e))
    }
}

impl From<SearchQueryError> for TransferError {
    fn from(e: SearchQueryError) -> Self {
        Self::Validation(ValidationError::Query(e))
    }
}
