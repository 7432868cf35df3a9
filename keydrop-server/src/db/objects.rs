//! Transfer object database operations

use keydrop_common::TransferKey;
use keydrop_common::protocol::{ObjectInfo, ObjectSummary as WireSummary};
use sqlx::sqlite::SqlitePool;

use super::{decode_size, encode_size, sql};

/// A stored object as recorded in the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferObject {
    pub id: i64,
    pub key: TransferKey,
    /// Original, user-supplied file name (display only)
    pub display_name: String,
    /// Sanitized, disambiguated on-disk name
    pub storage_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    /// Opaque store handle; owned by exactly one object
    pub physical_location: String,
    pub sha256: String,
    pub is_public: bool,
    pub created_at: String,
}

impl TransferObject {
    /// Public metadata as sent to clients
    pub fn to_info(&self) -> ObjectInfo {
        ObjectInfo {
            id: self.id,
            key: self.key.clone(),
            name: self.display_name.clone(),
            storage_name: self.storage_name.clone(),
            size: self.size_bytes,
            mime_type: self.mime_type.clone(),
            sha256: self.sha256.clone(),
            created_at: self.created_at.clone(),
        }
    }
}

/// Row type for full object queries
type ObjectRow = (
    i64,
    String,
    String,
    String,
    i64,
    String,
    String,
    String,
    bool,
    String,
);

impl TryFrom<ObjectRow> for TransferObject {
    type Error = sqlx::Error;

    fn try_from(row: ObjectRow) -> Result<Self, Self::Error> {
        let key = TransferKey::parse(&row.1).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(Self {
            id: row.0,
            key,
            display_name: row.2,
            storage_name: row.3,
            size_bytes: decode_size(row.4)?,
            mime_type: row.5,
            physical_location: row.6,
            sha256: row.7,
            is_public: row.8,
            created_at: row.9,
        })
    }
}

/// An object listing row with its download count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub id: i64,
    pub key: TransferKey,
    pub display_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub created_at: String,
    pub downloads: u64,
}

impl From<ObjectSummary> for WireSummary {
    fn from(summary: ObjectSummary) -> Self {
        Self {
            id: summary.id,
            key: summary.key,
            name: summary.display_name,
            size: summary.size_bytes,
            mime_type: summary.mime_type,
            created_at: summary.created_at,
            downloads: summary.downloads,
        }
    }
}

/// Row type for listing and search queries
type SummaryRow = (i64, String, String, i64, String, String, i64);

impl TryFrom<SummaryRow> for ObjectSummary {
    type Error = sqlx::Error;

    fn try_from(row: SummaryRow) -> Result<Self, Self::Error> {
        let key = TransferKey::parse(&row.1).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(Self {
            id: row.0,
            key,
            display_name: row.2,
            size_bytes: decode_size(row.3)?,
            mime_type: row.4,
            created_at: row.5,
            downloads: decode_size(row.6)?,
        })
    }
}

/// Everything needed to record a freshly stored object
#[derive(Debug, Clone)]
pub struct NewTransferObject<'a> {
    pub key: &'a TransferKey,
    pub display_name: &'a str,
    pub storage_name: &'a str,
    pub size_bytes: u64,
    pub mime_type: &'a str,
    pub physical_location: &'a str,
    pub sha256: &'a str,
    pub is_public: bool,
    pub created_at: &'a str,
}

/// Result of inserting an object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(TransferObject),
    /// Another object already holds this key; nothing was written
    KeyConflict,
}

/// Database access for transfer objects
#[derive(Clone)]
pub struct ObjectDb {
    pool: SqlitePool,
}

impl ObjectDb {
    /// Create a new ObjectDb instance
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a new object
    ///
    /// A duplicate key is reported as `InsertOutcome::KeyConflict`; any other
    /// constraint failure (such as a reused physical location) is an error.
    pub async fn insert(&self, object: &NewTransferObject<'_>) -> Result<InsertOutcome, sqlx::Error> {
        let result = sqlx::query(sql::SQL_INSERT_OBJECT)
            .bind(object.key.as_str())
            .bind(object.display_name)
            .bind(object.storage_name)
            .bind(encode_size(object.size_bytes)?)
            .bind(object.mime_type)
            .bind(object.physical_location)
            .bind(object.sha256)
            .bind(object.is_public)
            .bind(object.created_at)
            .execute(&self.pool)
            .await;

        let id = match result {
            Ok(done) => done.last_insert_rowid(),
            Err(e) if is_key_conflict(&e) => return Ok(InsertOutcome::KeyConflict),
            Err(e) => return Err(e),
        };

        let stored = self
            .find_by_id(id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;

        Ok(InsertOutcome::Inserted(stored))
    }

    /// Look up an object by internal id
    pub async fn find_by_id(&self, id: i64) -> Result<Option<TransferObject>, sqlx::Error> {
        let row: Option<ObjectRow> = sqlx::query_as(sql::SQL_SELECT_OBJECT_BY_ID)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TransferObject::try_from).transpose()
    }

    /// Look up an object by client-facing key
    pub async fn find_by_key(&self, key: &TransferKey) -> Result<Option<TransferObject>, sqlx::Error> {
        let row: Option<ObjectRow> = sqlx::query_as(sql::SQL_SELECT_OBJECT_BY_KEY)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TransferObject::try_from).transpose()
    }

    /// Every stored object, oldest first
    pub async fn all(&self) -> Result<Vec<TransferObject>, sqlx::Error> {
        let rows: Vec<ObjectRow> = sqlx::query_as(sql::SQL_SELECT_ALL_OBJECTS)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TransferObject::try_from).collect()
    }

    /// Most recent objects, newest first, with download counts
    pub async fn list_recent(&self, limit: u32, offset: u32) -> Result<Vec<ObjectSummary>, sqlx::Error> {
        let rows: Vec<SummaryRow> = sqlx::query_as(sql::SQL_SELECT_RECENT_OBJECTS)
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ObjectSummary::try_from).collect()
    }

    /// Case-insensitive substring search over display names
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<ObjectSummary>, sqlx::Error> {
        let rows: Vec<SummaryRow> = sqlx::query_as(sql::SQL_SEARCH_OBJECTS)
            .bind(query)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ObjectSummary::try_from).collect()
    }

    /// Number of stored objects
    pub async fn count(&self) -> Result<u64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(sql::SQL_COUNT_OBJECTS)
            .fetch_one(&self.pool)
            .await?;

        decode_size(count)
    }

    /// Delete an object row
    ///
    /// Returns true if the row was deleted, false if it didn't exist.
    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(sql::SQL_DELETE_OBJECT)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Whether `err` is a UNIQUE violation on the key column
fn is_key_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() && db_err.message().contains("transfer_objects.key")
        }
        _ => false,
    }
}
