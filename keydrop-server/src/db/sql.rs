//! SQL query constants for database operations
//!
//! This module contains all SQL queries used by the ledger. Each query is
//! documented with its parameters and special behaviors.

// ========================================================================
// Transfer Object Queries
// ========================================================================

/// Column list shared by every full-row object query
///
/// **Returns:** `(id, key, display_name, storage_name, size_bytes, mime_type,
/// physical_location, sha256, is_public, created_at)`
macro_rules! object_columns {
    () => {
        "id, key, display_name, storage_name, size_bytes, mime_type, physical_location, sha256, is_public, created_at"
    };
}

/// Insert a new transfer object
///
/// **Parameters:**
/// 1. `key: &str` - Client-facing key
/// 2. `display_name: &str` - Original file name
/// 3. `storage_name: &str` - Sanitized, disambiguated on-disk name
/// 4. `size_bytes: i64` - Object size (> 0)
/// 5. `mime_type: &str`
/// 6. `physical_location: &str` - Store handle
/// 7. `sha256: &str` - Hex content hash
/// 8. `is_public: bool`
/// 9. `created_at: &str` - RFC 3339 timestamp
///
/// **Returns:** `last_insert_rowid()` - The new object's id
///
/// **Note:** Fails with a UNIQUE violation on `transfer_objects.key` if the
/// key is already taken. The ledger reports that as a key conflict so the
/// caller can retry with a fresh key.
pub const SQL_INSERT_OBJECT: &str = "INSERT INTO transfer_objects (key, display_name, storage_name, size_bytes, mime_type, physical_location, sha256, is_public, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

/// Select an object by internal id
///
/// **Parameters:**
/// 1. `id: i64`
pub const SQL_SELECT_OBJECT_BY_ID: &str =
    concat!("SELECT ", object_columns!(), " FROM transfer_objects WHERE id = ?");

/// Select an object by client-facing key
///
/// **Parameters:**
/// 1. `key: &str`
pub const SQL_SELECT_OBJECT_BY_KEY: &str =
    concat!("SELECT ", object_columns!(), " FROM transfer_objects WHERE key = ?");

/// Select every stored object (used by the startup consistency check)
///
/// **Parameters:** None
pub const SQL_SELECT_ALL_OBJECTS: &str =
    concat!("SELECT ", object_columns!(), " FROM transfer_objects ORDER BY id");

/// Most recent objects with their download counts
///
/// **Parameters:**
/// 1. `limit: i64`
/// 2. `offset: i64`
///
/// **Returns:** Multiple rows of `(id, key, display_name, size_bytes,
/// mime_type, created_at, downloads)`
///
/// **Note:** Newest first; ties (same timestamp) broken by id.
pub const SQL_SELECT_RECENT_OBJECTS: &str = "SELECT o.id, o.key, o.display_name, o.size_bytes, o.mime_type, o.created_at, (SELECT COUNT(*) FROM download_events d WHERE d.transfer_object_id = o.id) FROM transfer_objects o ORDER BY o.created_at DESC, o.id DESC LIMIT ? OFFSET ?";

/// Case-insensitive substring search over display names
///
/// **Parameters:**
/// 1. `query: &str` - Substring to look for
/// 2. `limit: i64`
///
/// **Note:** Uses `instr()` rather than `LIKE` so `%` and `_` in the query
/// match literally. `LOWER()` only folds ASCII.
pub const SQL_SEARCH_OBJECTS: &str = "SELECT o.id, o.key, o.display_name, o.size_bytes, o.mime_type, o.created_at, (SELECT COUNT(*) FROM download_events d WHERE d.transfer_object_id = o.id) FROM transfer_objects o WHERE instr(LOWER(o.display_name), LOWER(?)) > 0 ORDER BY o.created_at DESC, o.id DESC LIMIT ?";

/// Count stored objects
///
/// **Returns:** `(count: i64)`
pub const SQL_COUNT_OBJECTS: &str = "SELECT COUNT(*) FROM transfer_objects";

/// Delete an object row by id
///
/// **Parameters:**
/// 1. `id: i64`
///
/// **Note:** Download events are not cascaded; they outlive the object until
/// a retention sweep.
pub const SQL_DELETE_OBJECT: &str = "DELETE FROM transfer_objects WHERE id = ?";

// ========================================================================
// Download Event Queries
// ========================================================================

/// Append a download event
///
/// **Parameters:**
/// 1. `transfer_object_id: i64`
/// 2. `client_address: &str`
/// 3. `occurred_at: &str` - RFC 3339 timestamp
/// 4. `completed: bool`
/// 5. `bytes_sent: i64`
/// 6. `throughput_bytes_per_second: f64`
///
/// **Returns:** `last_insert_rowid()` - The new event's id
pub const SQL_INSERT_DOWNLOAD_EVENT: &str = "INSERT INTO download_events (transfer_object_id, client_address, occurred_at, completed, bytes_sent, throughput_bytes_per_second) VALUES (?, ?, ?, ?, ?, ?)";

/// Select all events for one object, oldest first
///
/// **Parameters:**
/// 1. `transfer_object_id: i64`
///
/// **Returns:** Multiple rows of `(id, transfer_object_id, client_address,
/// occurred_at, completed, bytes_sent, throughput_bytes_per_second)`
pub const SQL_SELECT_DOWNLOAD_EVENTS_FOR_OBJECT: &str = "SELECT id, transfer_object_id, client_address, occurred_at, completed, bytes_sent, throughput_bytes_per_second FROM download_events WHERE transfer_object_id = ? ORDER BY id";

/// Count events for one object
///
/// **Parameters:**
/// 1. `transfer_object_id: i64`
///
/// **Returns:** `(count: i64)`
pub const SQL_COUNT_DOWNLOADS_FOR_OBJECT: &str =
    "SELECT COUNT(*) FROM download_events WHERE transfer_object_id = ?";

/// Count every recorded download
///
/// **Returns:** `(count: i64)`
pub const SQL_COUNT_ALL_DOWNLOADS: &str = "SELECT COUNT(*) FROM download_events";

/// Retention sweep: drop events older than a cutoff
///
/// **Parameters:**
/// 1. `cutoff: &str` - RFC 3339 timestamp in the same fixed format used on insert
///
/// **Note:** Timestamps are written with fixed-width microseconds and a `Z`
/// suffix, so string comparison is chronological.
pub const SQL_DELETE_DOWNLOAD_EVENTS_BEFORE: &str =
    "DELETE FROM download_events WHERE occurred_at < ?";
