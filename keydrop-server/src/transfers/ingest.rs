//! Ingest flow: client bytes in, key out
//!
//! Bytes are streamed into the store first. The ledger row is written only
//! after the store has committed the object, so a recorded object always has
//! its bytes. Any failure after the store commit removes the bytes again.

use std::io;
use std::time::Instant;

use chrono::Utc;
use keydrop_common::validators::validate_display_name;
use keydrop_common::{TransferKey, sanitize_file_name, split_extension};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::meter::ProgressMeter;
use super::mime::detect_mime_type;
use super::state::{TransferDirection, TransferLifecycle};
use super::TransferCoordinator;
use crate::db::{InsertOutcome, NewTransferObject, now_timestamp};
use crate::error::{TransferError, ValidationError};
use crate::store::StoreError;

/// Longest sanitized name kept in a storage name
const MAX_STORAGE_SLUG_LENGTH: usize = 160;

/// Extensions longer than this are folded into the slug when truncating
const MAX_KEPT_EXTENSION_LENGTH: usize = 16;

/// What a client asks to upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    /// Original file name
    pub name: String,
    /// Declared size; the stream must deliver exactly this many bytes
    pub size: Option<u64>,
    /// Declared MIME type
    pub mime_type: Option<String>,
}

impl IngestRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
            mime_type: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// A validated upload holding its provisional key
///
/// The key can be handed to the client before any byte is read so it can
/// subscribe to progress. If the key collides in the ledger it is replaced
/// and subscribers are moved to the new one.
#[derive(Debug)]
pub struct PreparedIngest {
    key: TransferKey,
    name: String,
    size: Option<u64>,
    mime_type: Option<String>,
}

impl PreparedIngest {
    pub fn key(&self) -> &TransferKey {
        &self.key
    }
}

/// A stored and recorded object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTransfer {
    pub id: i64,
    pub key: TransferKey,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub sha256: String,
    pub created_at: String,
}

impl TransferCoordinator {
    /// Validate an upload request and allocate its provisional key
    ///
    /// Nothing is stored or recorded.
    pub fn prepare_ingest(&self, request: IngestRequest) -> Result<PreparedIngest, TransferError> {
        validate_display_name(&request.name)?;

        let limit = self.config.max_upload_size;
        match request.size {
            Some(0) => return Err(ValidationError::Empty.into()),
            Some(size) if size > limit => return Err(ValidationError::TooLarge { limit }.into()),
            _ => {}
        }

        Ok(PreparedIngest {
            key: TransferKey::generate(),
            name: request.name,
            size: request.size,
            mime_type: request.mime_type,
        })
    }

    /// Store `source` as a new object and record it
    pub async fn create_transfer<R>(
        &self,
        source: &mut R,
        request: IngestRequest,
    ) -> Result<CreatedTransfer, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let prepared = self.prepare_ingest(request)?;
        self.ingest(prepared, source).await
    }

    /// Run a prepared upload to completion
    pub async fn ingest<R>(
        &self,
        prepared: PreparedIngest,
        source: &mut R,
    ) -> Result<CreatedTransfer, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let PreparedIngest {
            mut key,
            name,
            size,
            mime_type,
        } = prepared;

        let mut lifecycle = TransferLifecycle::initiate(key.clone(), TransferDirection::Ingest);
        let storage_name = disambiguated_storage_name(&sanitize_file_name(&name));
        let limit = self.config.max_upload_size;
        let stall = self.config.progress_timeout;
        let mut meter = ProgressMeter::new(
            size.unwrap_or(0),
            self.config.meter_config(),
            false,
            Instant::now(),
        );

        let on_chunk = |written: u64| {
            lifecycle.start();
            if let Some(tick) = meter.record(written, Instant::now()) {
                self.hub.publish(&key, tick);
            }
        };
        let put_result = match size {
            Some(expected) => {
                let mut bounded = (&mut *source).take(expected);
                self.store
                    .put(&mut bounded, &storage_name, limit, stall, on_chunk)
                    .await
            }
            None => {
                self.store
                    .put(source, &storage_name, limit, stall, on_chunk)
                    .await
            }
        };

        let stored = match put_result {
            Ok(stored) => stored,
            Err(e) => {
                let err = store_error_to_transfer(e);
                return Err(self.fail_ingest(&mut lifecycle, &key, meter.transferred(), err));
            }
        };

        if let Some(expected) = size.filter(|&expected| expected != stored.size) {
            self.discard(&stored.location).await;
            let err = TransferError::Source(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {expected} bytes, received {}", stored.size),
            ));
            return Err(self.fail_ingest(&mut lifecycle, &key, stored.size, err));
        }

        if let Some(tick) = meter.finish(Instant::now()) {
            self.hub.publish(&key, tick);
        }

        let mime = detect_mime_type(mime_type.as_deref(), &stored.head, &name);
        let created_at = now_timestamp();
        let mut attempts = 0;

        let object = loop {
            attempts += 1;
            let record = NewTransferObject {
                key: &key,
                display_name: &name,
                storage_name: &storage_name,
                size_bytes: stored.size,
                mime_type: &mime,
                physical_location: &stored.location,
                sha256: &stored.sha256,
                is_public: true,
                created_at: &created_at,
            };

            match self.ledger.objects.insert(&record).await {
                Ok(InsertOutcome::Inserted(object)) => break object,
                Ok(InsertOutcome::KeyConflict) if attempts < self.config.key_attempts => {
                    let fresh = TransferKey::generate();
                    tracing::warn!(
                        key = %key,
                        replacement = %fresh,
                        attempt = attempts,
                        "transfer key collision, retrying with a new key"
                    );
                    self.hub.move_subscribers(&key, &fresh);
                    lifecycle.rekey(fresh.clone());
                    key = fresh;
                }
                Ok(InsertOutcome::KeyConflict) => {
                    tracing::error!(
                        key = %key,
                        attempts,
                        location = %stored.location,
                        "could not allocate a unique transfer key"
                    );
                    self.discard(&stored.location).await;
                    let err = TransferError::KeyGeneration { attempts };
                    return Err(self.fail_ingest(&mut lifecycle, &key, stored.size, err));
                }
                Err(e) => {
                    tracing::error!(
                        key = %key,
                        location = %stored.location,
                        error = %e,
                        "failed to record stored object"
                    );
                    self.discard(&stored.location).await;
                    return Err(self.fail_ingest(&mut lifecycle, &key, stored.size, e.into()));
                }
            }
        };

        lifecycle.complete(object.size_bytes);
        self.hub.publish_completion(&object.key);

        tracing::info!(
            id = object.id,
            key = %object.key,
            size = object.size_bytes,
            location = %object.physical_location,
            "object stored"
        );

        Ok(CreatedTransfer {
            id: object.id,
            key: object.key,
            name: object.display_name,
            size_bytes: object.size_bytes,
            mime_type: object.mime_type,
            sha256: object.sha256,
            created_at: object.created_at,
        })
    }

    /// Move an ingest to `Failed`, tell subscribers, and hand the error back
    fn fail_ingest(
        &self,
        lifecycle: &mut TransferLifecycle,
        key: &TransferKey,
        bytes: u64,
        err: TransferError,
    ) -> TransferError {
        if matches!(err, TransferError::StoreWrite(_)) {
            tracing::error!(key = %key, bytes, error = %err, "store write failed");
        }
        lifecycle.fail(bytes, &err.to_string());
        self.hub.publish_error(key, &err.client_message());
        err
    }

    /// Remove bytes that will never get a ledger row
    async fn discard(&self, location: &str) {
        if let Err(e) = self.store.delete(location).await {
            tracing::warn!(location, error = %e, "failed to remove unrecorded object");
        }
    }
}

fn store_error_to_transfer(err: StoreError) -> TransferError {
    match err {
        StoreError::Empty => ValidationError::Empty.into(),
        StoreError::TooLarge { limit } => ValidationError::TooLarge { limit }.into(),
        StoreError::Source { source, .. } => TransferError::Source(source),
        other => TransferError::StoreWrite(other),
    }
}

/// Prefix a sanitized name with a timestamp and random salt
///
/// Sanitized names collide easily (`a b.txt` and `a-b.txt`); the prefix
/// makes the physical name unique in practice, and the ledger's unique index
/// on the location catches the rest.
fn disambiguated_storage_name(sanitized: &str) -> String {
    use rand::RngExt;
    let salt: [u8; 4] = rand::rng().random();
    format!(
        "{}-{}-{}",
        Utc::now().timestamp_millis(),
        hex::encode(salt),
        truncate_slug(sanitized)
    )
}

/// Bound the length of a sanitized name, keeping a short extension
///
/// Sanitized names are ASCII, so byte slicing is safe.
fn truncate_slug(sanitized: &str) -> String {
    if sanitized.len() <= MAX_STORAGE_SLUG_LENGTH {
        return sanitized.to_string();
    }
    let (base, extension) = split_extension(sanitized);
    if extension.len() > MAX_KEPT_EXTENSION_LENGTH {
        return sanitized[..MAX_STORAGE_SLUG_LENGTH].to_string();
    }
    let keep = (MAX_STORAGE_SLUG_LENGTH - extension.len()).min(base.len());
    format!("{}{}", base[..keep].trim_end_matches('-'), extension)
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use keydrop_common::validators::DisplayNameError;
    use tokio::io::{AsyncWriteExt, ReadBuf};

    use super::*;
    use crate::config::ServerConfig;
    use crate::hub::HubEvent;
    use crate::transfers::testing::create_test_coordinator;

    fn small_config(max: u64) -> ServerConfig {
        ServerConfig {
            max_upload_size: max,
            ..ServerConfig::default()
        }
    }

    /// Source that yields `head` and then fails like a reset connection
    struct ResetAfter {
        head: &'static [u8],
    }

    impl AsyncRead for ResetAfter {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.head.is_empty() {
                return Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()));
            }
            let n = self.head.len().min(buf.remaining());
            buf.put_slice(&self.head[..n]);
            self.head = &self.head[n..];
            Poll::Ready(Ok(()))
        }
    }

    /// Drain everything queued for a session
    fn drain(rx: &mut tokio::sync::mpsc::Receiver<HubEvent>) -> Vec<HubEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn object_files(coordinator: &TransferCoordinator) -> Vec<String> {
        std::fs::read_dir(coordinator.store().root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_create_and_open_round_trip() {
        let (_dir, coordinator) = create_test_coordinator(small_config(1024)).await;
        let data = b"hello keydrop".to_vec();

        let created = coordinator
            .create_transfer(&mut &data[..], IngestRequest::new("greeting.txt"))
            .await
            .unwrap();

        assert_eq!(created.name, "greeting.txt");
        assert_eq!(created.size_bytes, data.len() as u64);
        assert_eq!(created.mime_type, "text/plain");
        assert_eq!(created.key.as_str().len(), 36);

        let opened = coordinator.open_transfer(created.key.as_str()).await.unwrap();
        assert_eq!(opened.size_bytes(), data.len() as u64);
        let mut content = Vec::new();
        opened.into_reader().read_to_end(&mut content).await.unwrap();
        assert_eq!(content, data);
    }

    #[tokio::test]
    async fn test_one_byte_object() {
        let (_dir, coordinator) = create_test_coordinator(small_config(1024)).await;
        let created = coordinator
            .create_transfer(&mut &b"x"[..], IngestRequest::new("x").with_size(1))
            .await
            .unwrap();
        assert_eq!(created.size_bytes, 1);
    }

    #[tokio::test]
    async fn test_exactly_max_size_accepted() {
        let (_dir, coordinator) = create_test_coordinator(small_config(100)).await;
        let data = vec![1u8; 100];
        let created = coordinator
            .create_transfer(&mut &data[..], IngestRequest::new("max.bin"))
            .await
            .unwrap();
        assert_eq!(created.size_bytes, 100);
    }

    #[tokio::test]
    async fn test_one_over_max_rejected_without_side_effects() {
        let (_dir, coordinator) = create_test_coordinator(small_config(100)).await;
        let data = vec![1u8; 101];

        let err = coordinator
            .create_transfer(&mut &data[..], IngestRequest::new("big.bin"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Validation(ValidationError::TooLarge { limit: 100 })
        ));

        // Declared oversize is rejected before reading
        let err = coordinator
            .prepare_ingest(IngestRequest::new("big.bin").with_size(101))
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Validation(ValidationError::TooLarge { .. })
        ));

        assert_eq!(coordinator.ledger().objects.count().await.unwrap(), 0);
        assert!(object_files(&coordinator).is_empty());
    }

    #[tokio::test]
    async fn test_empty_rejected() {
        let (_dir, coordinator) = create_test_coordinator(small_config(100)).await;

        let err = coordinator
            .create_transfer(&mut &b""[..], IngestRequest::new("empty.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Validation(ValidationError::Empty)));

        let err = coordinator
            .prepare_ingest(IngestRequest::new("empty.txt").with_size(0))
            .unwrap_err();
        assert!(matches!(err, TransferError::Validation(ValidationError::Empty)));
        assert!(object_files(&coordinator).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let (_dir, coordinator) = create_test_coordinator(small_config(100)).await;
        let err = coordinator
            .prepare_ingest(IngestRequest::new("   "))
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Validation(ValidationError::Name(DisplayNameError::Empty))
        ));
    }

    #[tokio::test]
    async fn test_short_stream_leaves_no_object() {
        let (_dir, coordinator) = create_test_coordinator(small_config(100)).await;

        let err = coordinator
            .create_transfer(&mut &b"abc"[..], IngestRequest::new("a.txt").with_size(10))
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Source(_)));
        assert_eq!(coordinator.ledger().objects.count().await.unwrap(), 0);
        assert!(object_files(&coordinator).is_empty());
    }

    #[tokio::test]
    async fn test_stalled_upload_times_out() {
        let config = ServerConfig {
            progress_timeout: Duration::from_millis(50),
            ..small_config(100)
        };
        let (_dir, coordinator) = create_test_coordinator(config).await;
        let (session, mut rx) = coordinator.hub().connect();
        let (mut client, mut source) = tokio::io::duplex(1024);
        client.write_all(b"abc").await.unwrap();

        let prepared = coordinator
            .prepare_ingest(IngestRequest::new("s.bin").with_size(10))
            .unwrap();
        let key = prepared.key().clone();
        coordinator.hub().subscribe(session.id(), key.clone());

        let err = coordinator.ingest(prepared, &mut source).await.unwrap_err();

        match err {
            TransferError::Source(e) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(coordinator.ledger().objects.count().await.unwrap(), 0);
        assert!(object_files(&coordinator).is_empty());
        assert!(matches!(drain(&mut rx).last(), Some(HubEvent::Failed { key: k, .. }) if *k == key));
        drop(client);
    }

    #[tokio::test]
    async fn test_source_error_mid_stream_leaves_nothing() {
        let (_dir, coordinator) = create_test_coordinator(small_config(100)).await;
        let (session, mut rx) = coordinator.hub().connect();

        let prepared = coordinator
            .prepare_ingest(IngestRequest::new("r.bin").with_size(10))
            .unwrap();
        let key = prepared.key().clone();
        coordinator.hub().subscribe(session.id(), key.clone());

        let mut source = ResetAfter { head: b"abcd" };
        let err = coordinator.ingest(prepared, &mut source).await.unwrap_err();

        match err {
            TransferError::Source(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(coordinator.ledger().objects.count().await.unwrap(), 0);
        assert!(object_files(&coordinator).is_empty());

        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(HubEvent::Failed { key: k, .. }) if *k == key));
        // A tick for the bytes that did arrive, then the failure
        assert!(events.len() >= 2);
    }

    #[tokio::test]
    async fn test_store_write_failure_publishes_error_and_records_nothing() {
        let (_dir, coordinator) = create_test_coordinator(small_config(100)).await;
        let (session, mut rx) = coordinator.hub().connect();
        std::fs::remove_dir_all(coordinator.store().root()).unwrap();

        let prepared = coordinator.prepare_ingest(IngestRequest::new("w.txt")).unwrap();
        let key = prepared.key().clone();
        coordinator.hub().subscribe(session.id(), key.clone());

        let err = coordinator
            .ingest(prepared, &mut &b"hello"[..])
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::StoreWrite(StoreError::Write { .. })));
        assert_eq!(err.kind(), keydrop_common::ErrorKind::IoError);
        assert_eq!(coordinator.ledger().objects.count().await.unwrap(), 0);
        assert_eq!(
            drain(&mut rx),
            vec![HubEvent::Failed {
                key,
                reason: err.client_message(),
            }]
        );
    }

    #[tokio::test]
    async fn test_declared_size_bounds_the_read() {
        let (_dir, coordinator) = create_test_coordinator(small_config(100)).await;
        let mut source = &b"abcdefEXTRA"[..];

        let created = coordinator
            .create_transfer(&mut source, IngestRequest::new("a.txt").with_size(6))
            .await
            .unwrap();

        assert_eq!(created.size_bytes, 6);
        assert_eq!(source, b"EXTRA");
    }

    #[tokio::test]
    async fn test_subscriber_sees_ticks_then_completion() {
        let (_dir, coordinator) = create_test_coordinator(small_config(1024)).await;
        let (session, mut rx) = coordinator.hub().connect();

        let prepared = coordinator
            .prepare_ingest(IngestRequest::new("a.txt").with_size(5))
            .unwrap();
        coordinator.hub().subscribe(session.id(), prepared.key().clone());

        let created = coordinator.ingest(prepared, &mut &b"hello"[..]).await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let (last, ticks) = events.split_last().unwrap();
        assert_eq!(last, &HubEvent::Complete { key: created.key.clone() });
        assert!(!ticks.is_empty());
        match ticks.last().unwrap() {
            HubEvent::Progress { progress, .. } => {
                assert_eq!(progress.progress_percent, 100);
                assert!(!progress.estimated);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_publishes_error() {
        let (_dir, coordinator) = create_test_coordinator(small_config(4)).await;
        let (session, mut rx) = coordinator.hub().connect();

        let prepared = coordinator.prepare_ingest(IngestRequest::new("a.txt")).unwrap();
        let key = prepared.key().clone();
        coordinator.hub().subscribe(session.id(), key.clone());

        coordinator
            .ingest(prepared, &mut &b"too long"[..])
            .await
            .unwrap_err();

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert!(matches!(last, Some(HubEvent::Failed { key: k, .. }) if k == key));
    }

    #[tokio::test]
    async fn test_key_collision_retries_and_moves_subscribers() {
        let (_dir, coordinator) = create_test_coordinator(small_config(100)).await;
        let taken = coordinator
            .create_transfer(&mut &b"first"[..], IngestRequest::new("first.txt"))
            .await
            .unwrap();

        let (session, _rx) = coordinator.hub().connect();
        coordinator.hub().subscribe(session.id(), taken.key.clone());

        let prepared = PreparedIngest {
            key: taken.key.clone(),
            name: "second.txt".to_string(),
            size: None,
            mime_type: None,
        };
        let second = coordinator.ingest(prepared, &mut &b"second"[..]).await.unwrap();

        assert_ne!(second.key, taken.key);
        assert_eq!(coordinator.ledger().objects.count().await.unwrap(), 2);
        // The subscriber followed the new key, then was released on completion
        assert_eq!(coordinator.hub().subscriber_count(&taken.key), 0);
        assert_eq!(coordinator.hub().subscription_of(session.id()), None);
    }

    #[tokio::test]
    async fn test_key_collision_exhausted() {
        let config = ServerConfig {
            key_attempts: 1,
            ..small_config(100)
        };
        let (_dir, coordinator) = create_test_coordinator(config).await;
        let taken = coordinator
            .create_transfer(&mut &b"first"[..], IngestRequest::new("first.txt"))
            .await
            .unwrap();

        let prepared = PreparedIngest {
            key: taken.key.clone(),
            name: "second.txt".to_string(),
            size: None,
            mime_type: None,
        };
        let err = coordinator
            .ingest(prepared, &mut &b"second"[..])
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::KeyGeneration { attempts: 1 }));
        assert_eq!(coordinator.ledger().objects.count().await.unwrap(), 1);
        assert_eq!(object_files(&coordinator).len(), 1);
    }

    #[tokio::test]
    async fn test_same_name_twice_gets_distinct_locations() {
        let (_dir, coordinator) = create_test_coordinator(small_config(100)).await;
        let a = coordinator
            .create_transfer(&mut &b"a"[..], IngestRequest::new("same.txt"))
            .await
            .unwrap();
        let b = coordinator
            .create_transfer(&mut &b"b"[..], IngestRequest::new("same.txt"))
            .await
            .unwrap();

        let a = coordinator.ledger().objects.find_by_id(a.id).await.unwrap().unwrap();
        let b = coordinator.ledger().objects.find_by_id(b.id).await.unwrap().unwrap();
        assert_ne!(a.physical_location, b.physical_location);
        assert!(a.storage_name.ends_with("-same.txt"));
    }

    #[test]
    fn test_storage_name_shape() {
        let name = disambiguated_storage_name("my-file.TXT");
        let parts: Vec<&str> = name.splitn(3, '-').collect();
        assert!(parts[0].parse::<i64>().is_ok());
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2], "my-file.TXT");
    }

    #[test]
    fn test_truncate_slug() {
        let long = format!("{}.pdf", "a".repeat(300));
        let truncated = truncate_slug(&long);
        assert_eq!(truncated.len(), MAX_STORAGE_SLUG_LENGTH);
        assert!(truncated.ends_with(".pdf"));

        let long_ext = format!("a.{}", "b".repeat(300));
        assert_eq!(truncate_slug(&long_ext).len(), MAX_STORAGE_SLUG_LENGTH);

        assert_eq!(truncate_slug("short.txt"), "short.txt");
    }
}
