//! Keydrop Common Library
//!
//! Shared types, protocol messages, and helpers for the Keydrop file drop
//! server and the clients that talk to it.

mod error_kind;
pub mod io;
pub mod key;
pub mod names;
pub mod progress;
pub mod protocol;
pub mod validators;

pub use error_kind::ErrorKind;
pub use key::{KEY_LENGTH, KeyError, TransferKey};
pub use names::{sanitize_file_name, split_extension};
pub use progress::{Eta, ProgressEvent};

/// Default port for upload/download connections
pub const DEFAULT_TRANSFER_PORT: u16 = 7601;

/// Default port for the progress WebSocket
pub const DEFAULT_PROGRESS_PORT: u16 = 7602;

/// Default maximum upload size (100 MiB)
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// Chunk size for streaming object bytes (64KB)
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Maximum length of one JSON control line on the transfer port
///
/// Control messages are small; anything longer is treated as a protocol error
/// rather than buffered.
pub const MAX_CONTROL_LINE_LENGTH: usize = 64 * 1024;

/// MIME type used when nothing better is known
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";
