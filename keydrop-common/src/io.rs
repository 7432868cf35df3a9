//! I/O utilities for sending and receiving protocol messages
//!
//! Messages are one JSON document per line. Lines are bounded by
//! `MAX_CONTROL_LINE_LENGTH` so a misbehaving peer cannot make us buffer an
//! unbounded amount of data while looking for a newline.

use std::io;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MAX_CONTROL_LINE_LENGTH;
use crate::protocol::{ClientMessage, ServerMessage};

/// Default time a client has to send its request line
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Message Sending
// =============================================================================

/// Serialize `message` as one JSON line and flush it
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut payload =
        serde_json::to_vec(message).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    payload.push(b'\n');
    writer.write_all(&payload).await?;
    writer.flush().await
}

/// Send a `ServerMessage` to a client
pub async fn send_server_message<W>(writer: &mut W, message: &ServerMessage) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_message(writer, message).await
}

/// Send a `ClientMessage` to the server
pub async fn send_client_message<W>(writer: &mut W, message: &ClientMessage) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_message(writer, message).await
}

// =============================================================================
// Message Receiving
// =============================================================================

/// Read one JSON line and deserialize it
///
/// Returns `Ok(None)` if the connection was cleanly closed before any byte
/// of a new message arrived.
pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(MAX_CONTROL_LINE_LENGTH as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;

    if read == 0 {
        return Ok(None);
    }

    if line.last() != Some(&b'\n') {
        if line.len() > MAX_CONTROL_LINE_LENGTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "control line too long",
            ));
        }
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-message",
        ));
    }

    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }

    serde_json::from_slice(&line)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Read a `ClientMessage` from the stream
pub async fn read_client_message<R>(reader: &mut R) -> io::Result<Option<ClientMessage>>
where
    R: AsyncBufRead + Unpin,
{
    read_message(reader).await
}

/// Read a `ClientMessage`, failing with `TimedOut` if none arrives in time
pub async fn read_client_message_with_timeout<R>(
    reader: &mut R,
    timeout: Duration,
) -> io::Result<Option<ClientMessage>>
where
    R: AsyncBufRead + Unpin,
{
    match tokio::time::timeout(timeout, read_client_message(reader)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "timed out waiting for request",
        )),
    }
}

/// Read a `ServerMessage` from the stream
pub async fn read_server_message<R>(reader: &mut R) -> io::Result<Option<ServerMessage>>
where
    R: AsyncBufRead + Unpin,
{
    read_message(reader).await
}
