//! Listeners and accept loops for the transfer and progress ports

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::connection::{self, ConnectionParams};
use crate::connection_tracker::ConnectionTracker;
use crate::transfers::TransferCoordinator;
use crate::websocket;

/// Both listeners bound and ready to accept
pub struct Server {
    transfer_listener: TcpListener,
    progress_listener: TcpListener,
    coordinator: Arc<TransferCoordinator>,
}

impl Server {
    /// Bind the transfer and progress ports on `addr`
    ///
    /// Port 0 picks a free port; see `transfer_addr` and `progress_addr`.
    pub async fn bind(
        addr: IpAddr,
        transfer_port: u16,
        progress_port: u16,
        coordinator: Arc<TransferCoordinator>,
    ) -> io::Result<Self> {
        let transfer_listener = TcpListener::bind(SocketAddr::new(addr, transfer_port)).await?;
        let progress_listener = TcpListener::bind(SocketAddr::new(addr, progress_port)).await?;

        Ok(Self {
            transfer_listener,
            progress_listener,
            coordinator,
        })
    }

    pub fn transfer_addr(&self) -> io::Result<SocketAddr> {
        self.transfer_listener.local_addr()
    }

    pub fn progress_addr(&self) -> io::Result<SocketAddr> {
        self.progress_listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let Self {
            transfer_listener,
            progress_listener,
            coordinator,
        } = self;

        let max_per_ip = coordinator.config().max_transfers_per_ip;
        let transfer_tracker = Arc::new(ConnectionTracker::new(max_per_ip));
        let progress_tracker = Arc::new(ConnectionTracker::new(max_per_ip));

        tokio::select! {
            _ = shutdown => {
                tracing::info!("shutdown requested");
            }
            // Transfer port accept loop
            _ = async {
                loop {
                    match transfer_listener.accept().await {
                        Ok((socket, peer_addr)) => {
                            let Some(guard) = transfer_tracker.try_acquire(peer_addr.ip()) else {
                                tracing::debug!(peer = %peer_addr, "transfer connection limit reached");
                                tokio::spawn(async move {
                                    if let Err(e) = connection::reject_connection(socket).await {
                                        log_connection_error(&e, peer_addr);
                                    }
                                });
                                continue;
                            };

                            let params = ConnectionParams {
                                peer_addr,
                                coordinator: Arc::clone(&coordinator),
                            };
                            tokio::spawn(async move {
                                // Hold the slot until the connection ends
                                let _guard = guard;
                                if let Err(e) = connection::handle_connection(socket, params).await {
                                    log_connection_error(&e, peer_addr);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to accept transfer connection");
                        }
                    }
                }
            } => {}
            // Progress port accept loop
            _ = async {
                loop {
                    match progress_listener.accept().await {
                        Ok((socket, peer_addr)) => {
                            let Some(guard) = progress_tracker.try_acquire(peer_addr.ip()) else {
                                // Dropping the socket resets the connection
                                tracing::debug!(peer = %peer_addr, "progress connection limit reached");
                                continue;
                            };

                            let hub = Arc::clone(coordinator.hub());
                            tokio::spawn(async move {
                                let _guard = guard;
                                if let Err(e) =
                                    websocket::handle_progress_connection(socket, peer_addr, hub).await
                                {
                                    log_connection_error(&e, peer_addr);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to accept progress connection");
                        }
                    }
                }
            } => {}
        }
    }
}

/// Log a connection error, keeping clients that simply went away at debug
fn log_connection_error(error: &io::Error, peer_addr: SocketAddr) {
    match error.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::TimedOut => {
            tracing::debug!(peer = %peer_addr, error = %error, "connection ended");
        }
        _ => {
            tracing::warn!(peer = %peer_addr, error = %error, "connection error");
        }
    }
}
