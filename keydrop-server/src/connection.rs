//! Transfer port connection handling
//!
//! Each line on the wire is one `ClientMessage`. `Info` and the admin
//! requests may repeat on one connection; `Upload` and `Download` carry raw
//! bytes after their control line and end the connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use keydrop_common::{ErrorKind, TransferKey};
use keydrop_common::io::{read_client_message_with_timeout, send_server_message};
use keydrop_common::protocol::{ClientMessage, ServerMessage, client_message_type};

use crate::constants::{
    ERR_ADMIN_ONLY, ERR_ID_NOT_FOUND, ERR_INVALID_MESSAGE, ERR_TOO_MANY_TRANSFERS,
    ERR_UNEXPECTED_MESSAGE,
};
use crate::error::TransferError;
use crate::transfers::{IngestRequest, TransferCoordinator};

/// Parameters for handling a transfer connection
pub struct ConnectionParams {
    pub peer_addr: SocketAddr,
    pub coordinator: Arc<TransferCoordinator>,
}

/// Whether the connection can take another request
enum Flow {
    Continue,
    Close,
}

/// Handle a transfer port connection
pub async fn handle_connection(socket: TcpStream, params: ConnectionParams) -> io::Result<()> {
    handle_connection_inner(socket, params).await
}

/// Tell a client it is over its connection limit, then close
pub async fn reject_connection(mut socket: TcpStream) -> io::Result<()> {
    send_error(&mut socket, ERR_TOO_MANY_TRANSFERS, ErrorKind::Limit).await?;
    socket.shutdown().await
}

/// Connection loop over any byte stream
///
/// Generic so tests can drive it over an in-memory duplex.
pub async fn handle_connection_inner<S>(stream: S, params: ConnectionParams) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ConnectionParams {
        peer_addr,
        coordinator,
    } = params;
    let timeout = coordinator.config().request_timeout;

    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    tracing::debug!(peer = %peer_addr, "transfer connection opened");

    loop {
        let message = match read_client_message_with_timeout(&mut reader, timeout).await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                tracing::debug!(peer = %peer_addr, error = %e, "malformed request");
                send_error(&mut writer, ERR_INVALID_MESSAGE, ErrorKind::ProtocolError).await?;
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                tracing::debug!(peer = %peer_addr, "request timed out");
                break;
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(
            peer = %peer_addr,
            request = client_message_type(&message),
            "transfer request"
        );

        let flow = handle_message(message, &mut reader, &mut writer, peer_addr, &coordinator).await?;
        if matches!(flow, Flow::Close) {
            break;
        }
    }

    writer.shutdown().await.ok();
    tracing::debug!(peer = %peer_addr, "transfer connection closed");
    Ok(())
}

async fn handle_message<R, W>(
    message: ClientMessage,
    reader: &mut R,
    writer: &mut W,
    peer_addr: SocketAddr,
    coordinator: &TransferCoordinator,
) -> io::Result<Flow>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match message {
        ClientMessage::Upload {
            name,
            size,
            mime_type,
            watch,
        } => {
            let mut request = IngestRequest::new(name).with_size(size);
            if let Some(mime_type) = mime_type {
                request = request.with_mime_type(mime_type);
            }
            handle_upload(request, watch, reader, writer, coordinator).await?;
            Ok(Flow::Close)
        }
        ClientMessage::Download { key, watch } => {
            handle_download(&key, watch, writer, peer_addr, coordinator).await?;
            Ok(Flow::Close)
        }
        ClientMessage::Info { key } => {
            let reply = match coordinator.info_by_key(&key).await {
                Ok(object) => ServerMessage::InfoResponse {
                    object: object.to_info(),
                },
                Err(e) => error_message(&e),
            };
            send_server_message(writer, &reply).await?;
            Ok(Flow::Continue)
        }
        ClientMessage::List { .. } | ClientMessage::Search { .. } | ClientMessage::Delete { .. }
            if !is_admin_peer(peer_addr) =>
        {
            tracing::warn!(peer = %peer_addr, "admin request from non-local peer refused");
            send_error(writer, ERR_ADMIN_ONLY, ErrorKind::ProtocolError).await?;
            Ok(Flow::Continue)
        }
        ClientMessage::List { limit, offset } => {
            let reply = match coordinator.list_recent(limit, offset).await {
                Ok(listing) => ServerMessage::ListResponse {
                    objects: listing.objects.into_iter().map(Into::into).collect(),
                    count: listing.count,
                    total_downloads: listing.total_downloads,
                },
                Err(e) => error_message(&e),
            };
            send_server_message(writer, &reply).await?;
            Ok(Flow::Continue)
        }
        ClientMessage::Search { query } => {
            let reply = match coordinator.search(&query).await {
                Ok(objects) => ServerMessage::SearchResponse {
                    objects: objects.into_iter().map(Into::into).collect(),
                },
                Err(e) => error_message(&e),
            };
            send_server_message(writer, &reply).await?;
            Ok(Flow::Continue)
        }
        ClientMessage::Delete { id } => {
            let reply = match coordinator.delete(id).await {
                Ok(()) => ServerMessage::DeleteResponse { id },
                Err(TransferError::NotFound) => ServerMessage::Error {
                    message: ERR_ID_NOT_FOUND.to_string(),
                    kind: ErrorKind::NotFound.to_string(),
                },
                Err(e) => error_message(&e),
            };
            send_server_message(writer, &reply).await?;
            Ok(Flow::Continue)
        }
        ClientMessage::Subscribe { .. } | ClientMessage::Unsubscribe => {
            send_error(writer, ERR_UNEXPECTED_MESSAGE, ErrorKind::ProtocolError).await?;
            Ok(Flow::Continue)
        }
    }
}

async fn handle_upload<R, W>(
    request: IngestRequest,
    watch: Option<String>,
    reader: &mut R,
    writer: &mut W,
    coordinator: &TransferCoordinator,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let prepared = match coordinator.prepare_ingest(request) {
        Ok(prepared) => prepared,
        Err(e) => return send_server_message(writer, &error_message(&e)).await,
    };

    if let Some(watch_token) = watch {
        watch_transfer(coordinator, &watch_token, prepared.key().clone());
    }

    send_server_message(
        writer,
        &ServerMessage::UploadAccepted {
            key: prepared.key().clone(),
        },
    )
    .await?;

    let reply = match coordinator.ingest(prepared, reader).await {
        Ok(created) => ServerMessage::UploadResponse {
            id: created.id,
            key: created.key,
            name: created.name,
            size: created.size_bytes,
            created_at: created.created_at,
        },
        Err(e) => error_message(&e),
    };
    send_server_message(writer, &reply).await
}

async fn handle_download<W>(
    key: &str,
    watch: Option<String>,
    writer: &mut W,
    peer_addr: SocketAddr,
    coordinator: &TransferCoordinator,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let opened = match coordinator.open_transfer(key).await {
        Ok(opened) => opened,
        Err(e) => return send_server_message(writer, &error_message(&e)).await,
    };

    if let Some(watch_token) = watch {
        watch_transfer(coordinator, &watch_token, opened.key().clone());
    }

    send_server_message(
        writer,
        &ServerMessage::DownloadStart {
            name: opened.display_name().to_string(),
            size: opened.size_bytes(),
            mime_type: opened.mime_type().to_string(),
            content_disposition: opened.content_disposition(),
        },
    )
    .await?;

    // After DownloadStart the client only reads raw bytes, so failures are
    // reported through the ledger and the hub, not on this stream
    let client_address = peer_addr.ip().to_string();
    if let Err(e) = coordinator.deliver(opened, writer, &client_address).await {
        tracing::debug!(peer = %peer_addr, error = %e, "download ended early");
    }
    Ok(())
}

/// Subscribe the progress session holding `watch_token` on the client's behalf
fn watch_transfer(coordinator: &TransferCoordinator, watch_token: &str, key: TransferKey) {
    if !coordinator.hub().subscribe_watch(watch_token, key) {
        tracing::debug!("watch token matches no progress session");
    }
}

/// Admin requests are only served to loopback peers
fn is_admin_peer(peer_addr: SocketAddr) -> bool {
    peer_addr.ip().to_canonical().is_loopback()
}

fn error_message(error: &TransferError) -> ServerMessage {
    ServerMessage::Error {
        message: error.client_message(),
        kind: error.kind().to_string(),
    }
}

async fn send_error<W>(writer: &mut W, message: &str, kind: ErrorKind) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    send_server_message(
        writer,
        &ServerMessage::Error {
            message: message.to_string(),
            kind: kind.to_string(),
        },
    )
    .await
}
