//! Server-wide constants

use std::time::Duration;

// =============================================================================
// Paths
// =============================================================================

/// Directory under the platform data dir holding all server state
pub const DATA_DIR_NAME: &str = "keydropd";

/// Default database file name
pub const DATABASE_FILE_NAME: &str = "keydrop.db";

/// Default object store directory name
pub const OBJECTS_DIR_NAME: &str = "objects";

/// Suffix for objects that are still being written
pub const PART_SUFFIX: &str = ".part";

// =============================================================================
// Transfers
// =============================================================================

/// Attempts at inserting a fresh key before giving up
pub const KEY_GENERATION_ATTEMPTS: u32 = 3;

/// Minimum time between two progress ticks of one transfer
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Bytes moved that force a progress tick regardless of time
pub const DEFAULT_TICK_BYTES: u64 = 1024 * 1024;

/// Longest a transfer may go without moving a chunk
pub const DEFAULT_PROGRESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Window for the sliding throughput average
pub const SPEED_WINDOW: Duration = Duration::from_secs(5);

/// Default maximum simultaneous transfer connections per IP
pub const DEFAULT_MAX_TRANSFERS_PER_IP: usize = 5;

/// Upper bound for one admin listing page
pub const MAX_LIST_LIMIT: u32 = 500;

/// Maximum number of search results returned
pub const MAX_SEARCH_RESULTS: u32 = 100;

// =============================================================================
// Progress hub
// =============================================================================

/// Per-session buffer; events beyond this are dropped for that session
pub const SESSION_CHANNEL_CAPACITY: usize = 64;

/// Random bytes in a session's watch token
pub const WATCH_TOKEN_BYTES: usize = 16;

/// How long the WebSocket handshake may take
pub const WEBSOCKET_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Error messages
// =============================================================================

pub const ERR_NOT_FOUND: &str = "No object exists for that key";
pub const ERR_ID_NOT_FOUND: &str = "No object exists with that id";
pub const ERR_ADMIN_ONLY: &str = "Administrative requests are only accepted from localhost";
pub const ERR_INVALID_MESSAGE: &str = "Invalid message format";
pub const ERR_UNEXPECTED_MESSAGE: &str = "Unexpected message on this port";
pub const ERR_TOO_MANY_TRANSFERS: &str = "Too many simultaneous transfers from your address";
pub const ERR_INTERNAL: &str = "Internal server error";
