//! Object store errors

use std::io;
use std::path::PathBuf;

/// Errors from the object store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to prepare store directory {path}: {source}")]
    Init { path: PathBuf, source: io::Error },

    #[error("invalid object location {0:?}")]
    InvalidLocation(String),

    #[error("object location {0:?} is already in use")]
    LocationTaken(String),

    #[error("object is empty")]
    Empty,

    #[error("object exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    /// The incoming byte stream failed (client went away mid-upload)
    #[error("source stream failed after {bytes} bytes: {source}")]
    Source { bytes: u64, source: io::Error },

    #[error("failed to write object {location}: {source}")]
    Write { location: String, source: io::Error },

    /// No bytes at a location that should hold an object
    #[error("object bytes missing at {0}")]
    ObjectNotFound(String),

    #[error("failed to read object {location}: {source}")]
    Read { location: String, source: io::Error },

    #[error("failed to delete object {location}: {source}")]
    Delete { location: String, source: io::Error },
}
