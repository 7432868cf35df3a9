//! Administrative and informational pass-throughs

use chrono::{DateTime, Utc};
use keydrop_common::TransferKey;
use keydrop_common::validators::validate_search_query;

use super::TransferCoordinator;
use crate::constants::{MAX_LIST_LIMIT, MAX_SEARCH_RESULTS};
use crate::db::{NewDownloadEvent, ObjectSummary, TransferObject, format_timestamp, now_timestamp};
use crate::error::TransferError;
use crate::store::StoreError;

/// One page of the admin listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub objects: Vec<ObjectSummary>,
    /// Total stored objects
    pub count: u64,
    /// Total recorded downloads
    pub total_downloads: u64,
}

impl TransferCoordinator {
    /// Public metadata by key
    pub async fn info_by_key(&self, key: &str) -> Result<TransferObject, TransferError> {
        let Ok(key) = TransferKey::parse(key) else {
            return Err(TransferError::NotFound);
        };
        self.ledger
            .objects
            .find_by_key(&key)
            .await?
            .ok_or(TransferError::NotFound)
    }

    /// Metadata by internal id
    pub async fn info_by_id(&self, id: i64) -> Result<TransferObject, TransferError> {
        self.ledger
            .objects
            .find_by_id(id)
            .await?
            .ok_or(TransferError::NotFound)
    }

    /// Count a download of object `id` without streaming it
    ///
    /// The event is recorded as completed at request time; callers that
    /// stream bytes themselves use this when delivery happens elsewhere.
    /// Returns the object's new download count.
    pub async fn record_download(&self, id: i64, client_address: &str) -> Result<u64, TransferError> {
        let object = self.info_by_id(id).await?;
        let occurred_at = now_timestamp();

        self.ledger
            .downloads
            .append(&NewDownloadEvent {
                transfer_object_id: object.id,
                client_address,
                occurred_at: &occurred_at,
                completed: true,
                bytes_sent: 0,
                throughput_bytes_per_second: 0.0,
            })
            .await?;

        Ok(self.ledger.downloads.count_for_object(object.id).await?)
    }

    /// Most recent objects with download counts and totals
    pub async fn list_recent(&self, limit: u32, offset: u32) -> Result<Listing, TransferError> {
        let limit = limit.min(MAX_LIST_LIMIT);
        let objects = self.ledger.objects.list_recent(limit, offset).await?;
        let count = self.ledger.objects.count().await?;
        let total_downloads = self.ledger.downloads.count_all().await?;

        Ok(Listing {
            objects,
            count,
            total_downloads,
        })
    }

    /// Case-insensitive substring search over display names
    pub async fn search(&self, query: &str) -> Result<Vec<ObjectSummary>, TransferError> {
        validate_search_query(query)?;
        Ok(self
            .ledger
            .objects
            .search(query.trim(), MAX_SEARCH_RESULTS)
            .await?)
    }

    /// Remove an object's ledger row and its bytes
    ///
    /// If only one half existed (or one half could not be removed) the
    /// result is `Inconsistent`, after doing as much as possible.
    pub async fn delete(&self, id: i64) -> Result<(), TransferError> {
        let object = self.info_by_id(id).await?;

        let row_removed = self.ledger.objects.delete(id).await?;
        let bytes_result = self.store.delete(&object.physical_location).await;

        let bytes_removed = match &bytes_result {
            Ok(()) => true,
            Err(StoreError::ObjectNotFound(_)) => false,
            Err(e) => {
                tracing::error!(
                    id,
                    location = %object.physical_location,
                    error = %e,
                    "failed to delete object bytes; orphan needs cleanup"
                );
                false
            }
        };

        if !row_removed && matches!(bytes_result, Err(StoreError::ObjectNotFound(_))) {
            // A concurrent delete got there first
            return Err(TransferError::NotFound);
        }

        if row_removed && bytes_removed {
            tracing::info!(id, key = %object.key, "object deleted");
            return Ok(());
        }

        tracing::warn!(
            id,
            key = %object.key,
            location = %object.physical_location,
            row_removed,
            bytes_removed,
            "object was only partially present"
        );
        Err(TransferError::Inconsistent {
            id,
            row_removed,
            bytes_removed,
        })
    }

    /// Ids of recorded objects whose bytes are missing from the store
    ///
    /// A row whose location the store refuses to resolve counts as missing.
    /// Any other store failure aborts the check.
    pub async fn check_consistency(&self) -> Result<Vec<i64>, TransferError> {
        let mut missing = Vec::new();
        for object in self.ledger.objects.all().await? {
            let present = match self.store.exists(&object.physical_location).await {
                Ok(present) => present,
                Err(StoreError::InvalidLocation(_)) => false,
                Err(e) => {
                    tracing::error!(
                        id = object.id,
                        location = %object.physical_location,
                        error = %e,
                        "consistency check could not reach the store"
                    );
                    return Err(TransferError::StoreRead(e));
                }
            };
            if !present {
                tracing::warn!(
                    id = object.id,
                    key = %object.key,
                    location = %object.physical_location,
                    "recorded object has no bytes"
                );
                missing.push(object.id);
            }
        }
        Ok(missing)
    }

    /// Retention sweep over the download log
    pub async fn sweep_downloads_before(&self, cutoff: DateTime<Utc>) -> Result<u64, TransferError> {
        let removed = self
            .ledger
            .downloads
            .sweep_before(&format_timestamp(cutoff))
            .await?;
        if removed > 0 {
            tracing::info!(removed, "download events swept");
        }
        Ok(removed)
    }
}
