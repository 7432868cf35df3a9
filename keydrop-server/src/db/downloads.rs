//! Download event log
//!
//! Append-only: events are never updated, and only a retention sweep deletes
//! them.

use sqlx::sqlite::SqlitePool;

use super::{decode_size, encode_size, sql};

/// One recorded download
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadEvent {
    pub id: i64,
    pub transfer_object_id: i64,
    pub client_address: String,
    pub occurred_at: String,
    /// True once every byte was handed to the transport
    pub completed: bool,
    pub bytes_sent: u64,
    pub throughput_bytes_per_second: f64,
}

/// Row type for download event queries
type DownloadRow = (i64, i64, String, String, bool, i64, f64);

impl TryFrom<DownloadRow> for DownloadEvent {
    type Error = sqlx::Error;

    fn try_from(row: DownloadRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.0,
            transfer_object_id: row.1,
            client_address: row.2,
            occurred_at: row.3,
            completed: row.4,
            bytes_sent: decode_size(row.5)?,
            throughput_bytes_per_second: row.6,
        })
    }
}

/// Input for appending an event
#[derive(Debug, Clone)]
pub struct NewDownloadEvent<'a> {
    pub transfer_object_id: i64,
    pub client_address: &'a str,
    pub occurred_at: &'a str,
    pub completed: bool,
    pub bytes_sent: u64,
    pub throughput_bytes_per_second: f64,
}

/// Database access for download events
#[derive(Clone)]
pub struct DownloadDb {
    pool: SqlitePool,
}

impl DownloadDb {
    /// Create a new DownloadDb instance
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an event, returning its id
    pub async fn append(&self, event: &NewDownloadEvent<'_>) -> Result<i64, sqlx::Error> {
        // Never store NaN/inf; SQLite would turn them into NULL
        let throughput = if event.throughput_bytes_per_second.is_finite() {
            event.throughput_bytes_per_second.max(0.0)
        } else {
            0.0
        };

        let result = sqlx::query(sql::SQL_INSERT_DOWNLOAD_EVENT)
            .bind(event.transfer_object_id)
            .bind(event.client_address)
            .bind(event.occurred_at)
            .bind(event.completed)
            .bind(encode_size(event.bytes_sent)?)
            .bind(throughput)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    /// All events for one object, oldest first
    pub async fn events_for_object(&self, transfer_object_id: i64) -> Result<Vec<DownloadEvent>, sqlx::Error> {
        let rows: Vec<DownloadRow> = sqlx::query_as(sql::SQL_SELECT_DOWNLOAD_EVENTS_FOR_OBJECT)
            .bind(transfer_object_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(DownloadEvent::try_from).collect()
    }

    /// Number of events recorded for one object
    pub async fn count_for_object(&self, transfer_object_id: i64) -> Result<u64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(sql::SQL_COUNT_DOWNLOADS_FOR_OBJECT)
            .bind(transfer_object_id)
            .fetch_one(&self.pool)
            .await?;

        decode_size(count)
    }

    /// Number of events recorded overall
    pub async fn count_all(&self) -> Result<u64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(sql::SQL_COUNT_ALL_DOWNLOADS)
            .fetch_one(&self.pool)
            .await?;

        decode_size(count)
    }

    /// Retention sweep: delete events that occurred before `cutoff`
    ///
    /// `cutoff` must use the ledger timestamp format (see
    /// [`super::format_timestamp`]). Returns the number of events removed.
    pub async fn sweep_before(&self, cutoff: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(sql::SQL_DELETE_DOWNLOAD_EVENTS_BEFORE)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
