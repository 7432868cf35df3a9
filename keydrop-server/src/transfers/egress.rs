//! Egress flow: key in, bytes out
//!
//! Progress during egress counts bytes handed to the client transport, not
//! bytes the peer acknowledged, so every tick is marked `estimated`.

use std::io;
use std::time::{Duration, Instant};

use keydrop_common::{CHUNK_SIZE, TransferKey};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use super::TransferCoordinator;
use super::disposition::content_disposition;
use super::meter::ProgressMeter;
use super::state::{TransferDirection, TransferLifecycle};
use crate::db::{NewDownloadEvent, TransferObject, now_timestamp};
use crate::error::TransferError;
use crate::store::{ObjectReader, StoreError};

/// An object resolved by key with its bytes opened for reading
#[derive(Debug)]
pub struct OpenedTransfer {
    object: TransferObject,
    reader: ObjectReader,
}

impl OpenedTransfer {
    pub fn object(&self) -> &TransferObject {
        &self.object
    }

    pub fn key(&self) -> &TransferKey {
        &self.object.key
    }

    pub fn display_name(&self) -> &str {
        &self.object.display_name
    }

    pub fn size_bytes(&self) -> u64 {
        self.object.size_bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.object.mime_type
    }

    /// `Content-Disposition` value naming the original file
    pub fn content_disposition(&self) -> String {
        content_disposition(&self.object.display_name)
    }

    /// Take the raw byte stream, bypassing progress and accounting
    pub fn into_reader(self) -> ObjectReader {
        self.reader
    }
}

/// Outcome of a finished delivery
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub bytes_sent: u64,
    pub throughput_bytes_per_second: f64,
    /// Id of the recorded download event
    pub download_event_id: i64,
}

impl TransferCoordinator {
    /// Resolve `key` and open the object's bytes
    ///
    /// Anything that is not a key we issued (including an id) is
    /// `NotFound`. A ledger row whose bytes are gone is `ObjectMissing`.
    pub async fn open_transfer(&self, key: &str) -> Result<OpenedTransfer, TransferError> {
        let Ok(key) = TransferKey::parse(key) else {
            return Err(TransferError::NotFound);
        };

        let object = self
            .ledger
            .objects
            .find_by_key(&key)
            .await?
            .ok_or(TransferError::NotFound)?;

        let reader = match self.store.get(&object.physical_location).await {
            Ok(reader) => reader,
            Err(StoreError::ObjectNotFound(_) | StoreError::InvalidLocation(_)) => {
                return Err(missing_bytes(&object, "no bytes at location"));
            }
            Err(e) => return Err(TransferError::StoreRead(e)),
        };

        if reader.len() != object.size_bytes {
            return Err(missing_bytes(&object, "stored size differs from ledger"));
        }

        Ok(OpenedTransfer { object, reader })
    }

    /// Stream an opened object to `writer`, publishing progress and
    /// recording exactly one download event
    ///
    /// The event is `completed` only once every byte was written and
    /// flushed. A failing writer, or one that accepts nothing for the
    /// configured progress timeout, stops the read side immediately.
    pub async fn deliver<W>(
        &self,
        opened: OpenedTransfer,
        writer: &mut W,
        client_address: &str,
    ) -> Result<DeliveryReport, TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        let OpenedTransfer { object, mut reader } = opened;
        let key = object.key.clone();

        let mut lifecycle = TransferLifecycle::initiate(key.clone(), TransferDirection::Egress);
        let mut meter = ProgressMeter::new(
            object.size_bytes,
            self.config.meter_config(),
            true,
            Instant::now(),
        );

        let result = self
            .stream_object(&object, &mut reader, writer, &mut lifecycle, &mut meter)
            .await;
        drop(reader);

        let now = Instant::now();
        let bytes_sent = meter.transferred();
        let throughput = meter.average_bytes_per_second(now);
        let occurred_at = now_timestamp();
        let event = NewDownloadEvent {
            transfer_object_id: object.id,
            client_address,
            occurred_at: &occurred_at,
            completed: result.is_ok(),
            bytes_sent,
            throughput_bytes_per_second: throughput,
        };

        match result {
            Ok(()) => {
                if let Some(tick) = meter.finish(now) {
                    self.hub.publish(&key, tick);
                }
                let recorded = self.ledger.downloads.append(&event).await;
                lifecycle.complete(bytes_sent);
                self.hub.publish_completion(&key);

                let download_event_id = recorded.inspect_err(|e| {
                    tracing::error!(id = object.id, key = %key, error = %e, "failed to record download");
                })?;

                Ok(DeliveryReport {
                    bytes_sent,
                    throughput_bytes_per_second: throughput,
                    download_event_id,
                })
            }
            Err(err) => {
                if let Err(e) = self.ledger.downloads.append(&event).await {
                    tracing::warn!(id = object.id, key = %key, error = %e, "failed to record aborted download");
                }
                match &err {
                    TransferError::Sink(e) => {
                        tracing::debug!(key = %key, bytes_sent, error = %e, "client left mid-download");
                    }
                    other => {
                        tracing::error!(
                            id = object.id,
                            key = %key,
                            location = %object.physical_location,
                            error = %other,
                            "download failed"
                        );
                    }
                }
                lifecycle.fail(bytes_sent, &err.to_string());
                self.hub.publish_error(&key, &err.client_message());
                Err(err)
            }
        }
    }

    async fn stream_object<W>(
        &self,
        object: &TransferObject,
        reader: &mut ObjectReader,
        writer: &mut W,
        lifecycle: &mut TransferLifecycle,
        meter: &mut ProgressMeter,
    ) -> Result<(), TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        let stall = self.config.progress_timeout;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut sent: u64 = 0;

        while sent < object.size_bytes {
            let want = (object.size_bytes - sent).min(CHUNK_SIZE as u64) as usize;
            let n = reader.read(&mut buffer[..want]).await.map_err(|source| {
                TransferError::StoreRead(StoreError::Read {
                    location: object.physical_location.clone(),
                    source,
                })
            })?;
            if n == 0 {
                return Err(missing_bytes(object, "object truncated on disk"));
            }

            match timeout(stall, writer.write_all(&buffer[..n])).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(TransferError::Sink(e)),
                Err(_) => return Err(write_timeout(stall)),
            }
            sent += n as u64;

            lifecycle.start();
            if let Some(tick) = meter.record(sent, Instant::now()) {
                self.hub.publish(&object.key, tick);
            }
        }

        match timeout(stall, writer.flush()).await {
            Ok(result) => result.map_err(TransferError::Sink),
            Err(_) => Err(write_timeout(stall)),
        }
    }
}

fn write_timeout(stall: Duration) -> TransferError {
    TransferError::Sink(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("client accepted no data for {}s", stall.as_secs()),
    ))
}

/// Log ledger/storage drift and build the matching error
fn missing_bytes(object: &TransferObject, detail: &str) -> TransferError {
    tracing::error!(
        id = object.id,
        key = %object.key,
        location = %object.physical_location,
        detail,
        "object bytes missing"
    );
    TransferError::ObjectMissing {
        key: object.key.clone(),
        location: object.physical_location.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use super::*;
    use crate::config::ServerConfig;
    use crate::hub::HubEvent;
    use crate::transfers::IngestRequest;
    use crate::transfers::testing::create_test_coordinator;

    /// Writer that accepts `budget` bytes and then fails like a closed socket
    struct BrokenPipe {
        budget: usize,
    }

    impl AsyncWrite for BrokenPipe {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.budget == 0 {
                return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn upload(coordinator: &TransferCoordinator, data: &[u8], name: &str) -> TransferKey {
        let mut source = data;
        coordinator
            .create_transfer(&mut source, IngestRequest::new(name))
            .await
            .unwrap()
            .key
    }

    #[tokio::test]
    async fn test_deliver_records_completed_event() {
        let (_dir, coordinator) = create_test_coordinator(ServerConfig::default()).await;
        let data = vec![42u8; CHUNK_SIZE * 3 + 7];
        let key = upload(&coordinator, &data, "data.bin").await;

        let opened = coordinator.open_transfer(key.as_str()).await.unwrap();
        let id = opened.object().id;
        let mut sink = Vec::new();
        let report = coordinator.deliver(opened, &mut sink, "10.0.0.1").await.unwrap();

        assert_eq!(sink, data);
        assert_eq!(report.bytes_sent, data.len() as u64);

        let events = coordinator.ledger().downloads.events_for_object(id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].completed);
        assert_eq!(events[0].client_address, "10.0.0.1");
        assert_eq!(events[0].bytes_sent, data.len() as u64);
        assert_eq!(events[0].id, report.download_event_id);
    }

    #[tokio::test]
    async fn test_unknown_key_not_found() {
        let (_dir, coordinator) = create_test_coordinator(ServerConfig::default()).await;
        let err = coordinator
            .open_transfer(TransferKey::generate().as_str())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotFound));
    }

    #[tokio::test]
    async fn test_id_is_not_a_key() {
        let (_dir, coordinator) = create_test_coordinator(ServerConfig::default()).await;
        let created = coordinator
            .create_transfer(&mut &b"abc"[..], IngestRequest::new("a.txt"))
            .await
            .unwrap();

        let err = coordinator
            .open_transfer(&created.id.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotFound));
    }

    #[tokio::test]
    async fn test_missing_bytes_is_distinct_from_not_found() {
        let (_dir, coordinator) = create_test_coordinator(ServerConfig::default()).await;
        let key = upload(&coordinator, b"abc", "a.txt").await;
        let object = coordinator.ledger().objects.find_by_key(&key).await.unwrap().unwrap();

        std::fs::remove_file(coordinator.store().root().join(&object.physical_location)).unwrap();

        let err = coordinator.open_transfer(key.as_str()).await.unwrap_err();
        assert!(matches!(err, TransferError::ObjectMissing { .. }));
    }

    #[tokio::test]
    async fn test_broken_pipe_fails_and_records_incomplete() {
        let (_dir, coordinator) = create_test_coordinator(ServerConfig::default()).await;
        let data = vec![1u8; CHUNK_SIZE * 4];
        let key = upload(&coordinator, &data, "data.bin").await;

        let (session, mut rx) = coordinator.hub().connect();
        coordinator.hub().subscribe(session.id(), key.clone());

        let opened = coordinator.open_transfer(key.as_str()).await.unwrap();
        let id = opened.object().id;
        let mut writer = BrokenPipe { budget: CHUNK_SIZE };
        let err = coordinator
            .deliver(opened, &mut writer, "10.0.0.2")
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Sink(_)));

        let events = coordinator.ledger().downloads.events_for_object(id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].completed);
        assert_eq!(events[0].bytes_sent, CHUNK_SIZE as u64);

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert!(matches!(last, Some(HubEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn test_stalled_reader_times_out() {
        let config = ServerConfig {
            progress_timeout: Duration::from_millis(50),
            ..ServerConfig::default()
        };
        let (_dir, coordinator) = create_test_coordinator(config).await;
        let data = vec![3u8; CHUNK_SIZE * 2];
        let key = upload(&coordinator, &data, "data.bin").await;

        // The peer never reads, so writes stop once the pipe buffer fills
        let (peer, mut writer) = tokio::io::duplex(1024);
        let opened = coordinator.open_transfer(key.as_str()).await.unwrap();
        let id = opened.object().id;
        let err = coordinator
            .deliver(opened, &mut writer, "10.0.0.3")
            .await
            .unwrap_err();

        match err {
            TransferError::Sink(e) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected {other:?}"),
        }
        let events = coordinator.ledger().downloads.events_for_object(id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].completed);
        assert!(events[0].bytes_sent < data.len() as u64);
        drop(peer);
    }

    #[tokio::test]
    async fn test_egress_ticks_are_estimated() {
        let (_dir, coordinator) = create_test_coordinator(ServerConfig::default()).await;
        let key = upload(&coordinator, b"hello", "a.txt").await;

        let (session, mut rx) = coordinator.hub().connect();
        coordinator.hub().subscribe(session.id(), key.clone());

        let opened = coordinator.open_transfer(key.as_str()).await.unwrap();
        coordinator.deliver(opened, &mut Vec::<u8>::new(), "::1").await.unwrap();

        let events: Vec<HubEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(matches!(events.last(), Some(HubEvent::Complete { .. })));
        for event in &events[..events.len() - 1] {
            match event {
                HubEvent::Progress { progress, .. } => assert!(progress.estimated),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_opened_metadata() {
        let (_dir, coordinator) = create_test_coordinator(ServerConfig::default()).await;
        let key = upload(&coordinator, b"%PDF-1.4\n...", "report final.pdf").await;

        let opened = coordinator.open_transfer(key.as_str()).await.unwrap();
        assert_eq!(opened.display_name(), "report final.pdf");
        assert_eq!(opened.mime_type(), "application/pdf");
        assert_eq!(opened.key(), &key);
        assert!(opened
            .content_disposition()
            .contains("filename=\"report final.pdf\""));
    }
}
