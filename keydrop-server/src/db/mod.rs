//! Transfer ledger
//!
//! Durable record of stored objects and of every download, backed by SQLite.
//! Uniqueness of keys, ids and physical locations is enforced by the
//! database's own unique indexes, never by check-then-insert in Rust.

mod downloads;
mod objects;
pub mod sql;

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::constants::{DATA_DIR_NAME, DATABASE_FILE_NAME};

pub use downloads::{DownloadDb, DownloadEvent, NewDownloadEvent};
pub use objects::{InsertOutcome, NewTransferObject, ObjectDb, ObjectSummary, TransferObject};

/// Maximum pooled connections for the on-disk database
const MAX_POOL_CONNECTIONS: u32 = 8;

/// Errors that can occur while opening the ledger
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("no data directory available on this platform")]
    NoDataDir,

    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Handle to every ledger table
///
/// Cloning is cheap: all parts share one connection pool.
#[derive(Clone)]
pub struct TransferLedger {
    pub objects: ObjectDb,
    pub downloads: DownloadDb,
}

impl TransferLedger {
    /// Create a ledger over an already-migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            objects: ObjectDb::new(pool.clone()),
            downloads: DownloadDb::new(pool),
        }
    }
}

/// Get the default database path for the platform
///
/// - **Linux**: `~/.local/share/keydropd/keydrop.db`
/// - **macOS**: `~/Library/Application Support/keydropd/keydrop.db`
/// - **Windows**: `%APPDATA%\keydropd\keydrop.db`
pub fn default_database_path() -> Result<PathBuf, InitError> {
    let data_dir = dirs::data_dir().ok_or(InitError::NoDataDir)?;
    Ok(data_dir.join(DATA_DIR_NAME).join(DATABASE_FILE_NAME))
}

/// Open (creating if needed) the database at `path` and run migrations
pub async fn init_db(path: &Path) -> Result<SqlitePool, InitError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| InitError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_POOL_CONNECTIONS)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the schema applied
///
/// A single connection is used because every SQLite `:memory:` connection
/// is its own database.
pub async fn init_memory_db() -> Result<SqlitePool, InitError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Format a timestamp the way the ledger stores it
///
/// Fixed-width microseconds with a `Z` suffix, so stored timestamps sort
/// chronologically as plain strings.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time in ledger format
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Convert a stored INTEGER byte count back to `u64`
fn decode_size(value: i64) -> Result<u64, sqlx::Error> {
    u64::try_from(value).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

/// Convert a byte count to SQLite's INTEGER
fn encode_size(value: u64) -> Result<i64, sqlx::Error> {
    i64::try_from(value).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}
