//! Shared helpers for integration tests
//!
//! Each test gets its own server on ephemeral localhost ports, backed by a
//! temporary object store and an in-memory ledger.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use keydrop_common::io::{read_server_message, send_client_message};
use keydrop_common::protocol::{ClientMessage, ServerMessage};
use keydrop_server::config::ServerConfig;
use keydrop_server::db::{self, TransferLedger};
use keydrop_server::hub::ProgressHub;
use keydrop_server::server::Server;
use keydrop_server::store::ObjectStore;
use keydrop_server::transfers::TransferCoordinator;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// A running server; stops when dropped
pub struct TestServer {
    pub transfer_addr: SocketAddr,
    pub progress_addr: SocketAddr,
    pub coordinator: Arc<TransferCoordinator>,
    shutdown: Option<oneshot::Sender<()>>,
    _dir: TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Start a server with the given policy
pub async fn start_server(config: ServerConfig) -> TestServer {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = ObjectStore::open(dir.path().join("objects"))
        .await
        .expect("Failed to open store");
    let pool = db::init_memory_db()
        .await
        .expect("Failed to create test database");

    let coordinator = Arc::new(TransferCoordinator::new(
        config,
        TransferLedger::new(pool),
        store,
        Arc::new(ProgressHub::new()),
    ));

    let server = Server::bind(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        0,
        0,
        Arc::clone(&coordinator),
    )
    .await
    .expect("Failed to bind server");
    let transfer_addr = server.transfer_addr().unwrap();
    let progress_addr = server.progress_addr().unwrap();

    let (shutdown, stopped) = oneshot::channel();
    tokio::spawn(server.run(async {
        let _ = stopped.await;
    }));

    TestServer {
        transfer_addr,
        progress_addr,
        coordinator,
        shutdown: Some(shutdown),
        _dir: dir,
    }
}

/// One transfer port connection
pub struct TransferClient {
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
}

impl TransferClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("Failed to connect");
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub async fn send(&mut self, message: &ClientMessage) {
        send_client_message(&mut self.writer, message).await.unwrap();
    }

    pub async fn recv(&mut self) -> Option<ServerMessage> {
        read_server_message(&mut self.reader).await.unwrap()
    }

    pub async fn request(&mut self, message: &ClientMessage) -> ServerMessage {
        self.send(message).await;
        self.recv().await.expect("connection closed")
    }
}

/// Upload `data` and return the server's final reply
pub async fn upload(
    addr: SocketAddr,
    name: &str,
    data: &[u8],
    watch: Option<&str>,
) -> ServerMessage {
    let mut client = TransferClient::connect(addr).await;
    client
        .send(&ClientMessage::Upload {
            name: name.to_string(),
            size: data.len() as u64,
            mime_type: None,
            watch: watch.map(str::to_string),
        })
        .await;

    match client.recv().await.expect("connection closed") {
        ServerMessage::UploadAccepted { .. } => {}
        other => return other,
    }
    client.writer.write_all(data).await.unwrap();
    client.recv().await.expect("connection closed")
}

/// Download `key`, returning the header message and the body
pub async fn download(
    addr: SocketAddr,
    key: &str,
    watch: Option<&str>,
) -> (ServerMessage, Vec<u8>) {
    let mut client = TransferClient::connect(addr).await;
    let start = client
        .request(&ClientMessage::Download {
            key: key.to_string(),
            watch: watch.map(str::to_string),
        })
        .await;

    let mut body = Vec::new();
    if matches!(start, ServerMessage::DownloadStart { .. }) {
        client.reader.read_to_end(&mut body).await.unwrap();
    }
    (start, body)
}

/// One progress port session
pub struct ProgressClient {
    pub ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pub connection_id: u64,
    pub watch_token: String,
}

impl ProgressClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (ws, _response) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
            .await
            .expect("Failed to open progress WebSocket");
        let mut client = Self {
            ws,
            connection_id: 0,
            watch_token: String::new(),
        };
        match client.recv().await {
            Some(ServerMessage::Welcome {
                connection_id,
                watch_token,
            }) => {
                client.connection_id = connection_id;
                client.watch_token = watch_token;
            }
            other => panic!("expected Welcome, got {other:?}"),
        }
        client
    }

    pub async fn send(&mut self, message: &ClientMessage) {
        let json = serde_json::to_string(message).unwrap();
        self.ws.send(Message::Text(json.into())).await.unwrap();
    }

    /// Next server message, or `None` once the socket closes
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        while let Some(frame) = self.ws.next().await {
            match frame.ok()? {
                Message::Text(text) => return Some(serde_json::from_str(text.as_str()).unwrap()),
                Message::Close(_) => return None,
                _ => continue,
            }
        }
        None
    }

    pub async fn subscribe(&mut self, key: &str) {
        self.send(&ClientMessage::Subscribe {
            key: key.to_string(),
        })
        .await;
        match self.recv().await {
            Some(ServerMessage::Subscribed { .. }) => {}
            other => panic!("expected Subscribed, got {other:?}"),
        }
    }
}

/// Deterministic, non-repeating-looking test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8).collect()
}
