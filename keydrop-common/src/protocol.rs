//! Protocol definitions for Keydrop
//!
//! Control messages are newline-delimited JSON. On the transfer port a
//! control line may be followed by raw object bytes (after `Upload` from the
//! client, after `DownloadStart` from the server). On the progress port each
//! message travels as one WebSocket text frame.
//!
//! Keys arrive from clients as plain strings rather than `TransferKey` so
//! that a malformed key is answered with `not_found`, exactly like a key
//! that was never issued.

use serde::{Deserialize, Serialize};

use crate::key::TransferKey;
use crate::progress::ProgressEvent;

/// Client request messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Start an upload; exactly `size` raw bytes follow this line
    Upload {
        name: String,
        size: u64,
        /// Declared MIME type; sniffed from content if absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// Watch token of a progress session to subscribe to this upload's key
        #[serde(default, skip_serializing_if = "Option::is_none")]
        watch: Option<String>,
    },
    /// Download an object by key
    Download {
        key: String,
        /// Watch token of a progress session to subscribe to this download's key
        #[serde(default, skip_serializing_if = "Option::is_none")]
        watch: Option<String>,
    },
    /// Public metadata for an object
    Info { key: String },
    /// Most recent objects with download counts (admin)
    List {
        #[serde(default = "default_list_limit")]
        limit: u32,
        #[serde(default)]
        offset: u32,
    },
    /// Case-insensitive display name search (admin)
    Search { query: String },
    /// Delete an object's record and bytes (admin)
    Delete { id: i64 },
    /// Progress port: track one transfer key (replaces any prior one)
    Subscribe { key: String },
    /// Progress port: stop tracking
    Unsubscribe,
}

fn default_list_limit() -> u32 {
    50
}

/// Public metadata for a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub id: i64,
    pub key: TransferKey,
    /// Original, user-supplied file name
    pub name: String,
    /// Sanitized name used on disk
    pub storage_name: String,
    pub size: u64,
    pub mime_type: String,
    pub sha256: String,
    /// RFC 3339 timestamp
    pub created_at: String,
}

/// One row of an admin listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub id: i64,
    pub key: TransferKey,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub created_at: String,
    pub downloads: u64,
}

/// Server response and push messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Upload validated; the key under which progress will be published
    UploadAccepted { key: TransferKey },
    /// Upload stored and recorded
    UploadResponse {
        id: i64,
        key: TransferKey,
        name: String,
        size: u64,
        created_at: String,
    },
    /// Object bytes follow this line
    DownloadStart {
        name: String,
        size: u64,
        mime_type: String,
        content_disposition: String,
    },
    InfoResponse { object: ObjectInfo },
    ListResponse {
        objects: Vec<ObjectSummary>,
        /// Total number of stored objects
        count: u64,
        /// Total number of recorded downloads
        total_downloads: u64,
    },
    SearchResponse { objects: Vec<ObjectSummary> },
    DeleteResponse { id: i64 },
    /// Progress port greeting
    ///
    /// `watch_token` is private to this session; passing it as `watch` on
    /// the transfer port is the only way to attach the session to a transfer.
    Welcome {
        connection_id: u64,
        watch_token: String,
    },
    Subscribed { key: String },
    Unsubscribed,
    Progress {
        key: TransferKey,
        progress: ProgressEvent,
    },
    TransferComplete { key: TransferKey },
    TransferFailed { key: TransferKey, reason: String },
    Error {
        message: String,
        /// Machine-readable kind, see `ErrorKind`
        kind: String,
    },
}

/// Short message type name for logging
#[must_use]
pub fn client_message_type(message: &ClientMessage) -> &'static str {
    match message {
        ClientMessage::Upload { .. } => "Upload",
        ClientMessage::Download { .. } => "Download",
        ClientMessage::Info { .. } => "Info",
        ClientMessage::List { .. } => "List",
        ClientMessage::Search { .. } => "Search",
        ClientMessage::Delete { .. } => "Delete",
        ClientMessage::Subscribe { .. } => "Subscribe",
        ClientMessage::Unsubscribe => "Unsubscribe",
    }
}

/// Short message type name for logging
#[must_use]
pub fn server_message_type(message: &ServerMessage) -> &'static str {
    match message {
        ServerMessage::UploadAccepted { .. } => "UploadAccepted",
        ServerMessage::UploadResponse { .. } => "UploadResponse",
        ServerMessage::DownloadStart { .. } => "DownloadStart",
        ServerMessage::InfoResponse { .. } => "InfoResponse",
        ServerMessage::ListResponse { .. } => "ListResponse",
        ServerMessage::SearchResponse { .. } => "SearchResponse",
        ServerMessage::DeleteResponse { .. } => "DeleteResponse",
        ServerMessage::Welcome { .. } => "Welcome",
        ServerMessage::Subscribed { .. } => "Subscribed",
        ServerMessage::Unsubscribed => "Unsubscribed",
        ServerMessage::Progress { .. } => "Progress",
        ServerMessage::TransferComplete { .. } => "TransferComplete",
        ServerMessage::TransferFailed { .. } => "TransferFailed",
        ServerMessage::Error { .. } => "Error",
    }
}
