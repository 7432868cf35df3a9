//! Progress subscription endpoint
//!
//! One WebSocket session per watcher. Messages are JSON text frames: the
//! server greets with `Welcome`, the client picks a key with `Subscribe`,
//! and hub events are pushed until the socket closes.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use keydrop_common::protocol::{ClientMessage, ServerMessage, client_message_type};
use keydrop_common::{ErrorKind, TransferKey};

use crate::constants::{
    ERR_INVALID_MESSAGE, ERR_NOT_FOUND, ERR_UNEXPECTED_MESSAGE, WEBSOCKET_HANDSHAKE_TIMEOUT,
};
use crate::hub::{ProgressHub, SessionGuard};

/// Handle a progress port connection
pub async fn handle_progress_connection(
    socket: TcpStream,
    peer_addr: SocketAddr,
    hub: Arc<ProgressHub>,
) -> io::Result<()> {
    handle_progress_stream(socket, peer_addr, hub).await
}

/// Perform the WebSocket handshake over `stream` and run the session
pub async fn handle_progress_stream<S>(
    stream: S,
    peer_addr: SocketAddr,
    hub: Arc<ProgressHub>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ws_stream =
        tokio::time::timeout(WEBSOCKET_HANDSHAKE_TIMEOUT, tokio_tungstenite::accept_async(stream))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "WebSocket handshake timed out"))?
            .map_err(|e| io::Error::other(format!("WebSocket handshake failed: {e}")))?;

    let (session, mut events) = hub.connect();
    let (mut sink, mut stream) = ws_stream.split();

    tracing::debug!(peer = %peer_addr, connection_id = session.id(), "progress session opened");

    send(
        &mut sink,
        &ServerMessage::Welcome {
            connection_id: session.id(),
            watch_token: session.watch_token().to_string(),
        },
    )
    .await?;

    loop {
        tokio::select! {
            frame = stream.next() => {
                let text = match frame {
                    None | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(_))) => {
                        send(&mut sink, &error(ERR_INVALID_MESSAGE, ErrorKind::ProtocolError)).await?;
                        continue;
                    }
                    // Pings are answered by tungstenite on the next write
                    Some(Ok(_)) => continue,
                    Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => break,
                    Some(Err(e)) => return Err(io::Error::other(e)),
                };
                let reply = handle_text(text.as_str(), &session);
                send(&mut sink, &reply).await?;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                send(&mut sink, &ServerMessage::from(event)).await?;
            }
        }
    }

    tracing::debug!(peer = %peer_addr, connection_id = session.id(), "progress session closed");
    Ok(())
}

/// Answer one client text frame
fn handle_text(text: &str, session: &SessionGuard) -> ServerMessage {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(_) => return error(ERR_INVALID_MESSAGE, ErrorKind::ProtocolError),
    };

    match message {
        ClientMessage::Subscribe { key } => {
            // Keys are subscribable before the upload that owns them exists,
            // so only the shape is checked here
            let Ok(parsed) = TransferKey::parse(&key) else {
                return error(ERR_NOT_FOUND, ErrorKind::NotFound);
            };
            session.hub().subscribe(session.id(), parsed);
            ServerMessage::Subscribed { key }
        }
        ClientMessage::Unsubscribe => {
            session.hub().unsubscribe(session.id());
            ServerMessage::Unsubscribed
        }
        other => {
            tracing::debug!(
                connection_id = session.id(),
                request = client_message_type(&other),
                "transfer request on progress port"
            );
            error(ERR_UNEXPECTED_MESSAGE, ErrorKind::ProtocolError)
        }
    }
}

fn error(message: &str, kind: ErrorKind) -> ServerMessage {
    ServerMessage::Error {
        message: message.to_string(),
        kind: kind.to_string(),
    }
}

async fn send<S>(sink: &mut S, message: &ServerMessage) -> io::Result<()>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let json =
        serde_json::to_string(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(io::Error::other)
}
