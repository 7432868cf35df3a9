//! Command-line argument parsing

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use keydrop_common::{DEFAULT_MAX_UPLOAD_SIZE, DEFAULT_PROGRESS_PORT, DEFAULT_TRANSFER_PORT};

use crate::config::ServerConfig;
use crate::constants::{DEFAULT_MAX_TRANSFERS_PER_IP, DEFAULT_PROGRESS_TIMEOUT};

/// Get default database path help text for current platform
fn default_database_help() -> String {
    #[cfg(target_os = "linux")]
    return "Database file path (default: ~/.local/share/keydropd/keydrop.db)".to_string();

    #[cfg(target_os = "macos")]
    return "Database file path (default: ~/Library/Application Support/keydropd/keydrop.db)"
        .to_string();

    #[cfg(target_os = "windows")]
    return "Database file path (default: %APPDATA%\\keydropd\\keydrop.db)".to_string();

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    return "Database file path (overrides platform default)".to_string();
}

/// Get default object store help text for current platform
fn default_storage_root_help() -> String {
    #[cfg(target_os = "linux")]
    return "Object store directory (default: ~/.local/share/keydropd/objects/)".to_string();

    #[cfg(target_os = "macos")]
    return "Object store directory (default: ~/Library/Application Support/keydropd/objects/)"
        .to_string();

    #[cfg(target_os = "windows")]
    return "Object store directory (default: %APPDATA%\\keydropd\\objects\\)".to_string();

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    return "Object store directory (overrides platform default)".to_string();
}

/// Keydrop file drop server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// IP address to bind to (IPv4 or IPv6)
    #[arg(short, long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Port for uploads, downloads and lookups
    #[arg(short = 't', long, default_value_t = DEFAULT_TRANSFER_PORT)]
    pub transfer_port: u16,

    /// Port for the progress WebSocket
    #[arg(short = 'p', long, default_value_t = DEFAULT_PROGRESS_PORT)]
    pub progress_port: u16,

    /// Database file path (overrides platform default)
    #[arg(short, long, help = default_database_help())]
    pub database: Option<PathBuf>,

    /// Object store directory (overrides platform default)
    #[arg(short = 's', long = "storage-root", help = default_storage_root_help())]
    pub storage_root: Option<PathBuf>,

    /// Largest accepted upload in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_SIZE)]
    pub max_upload_size: u64,

    /// Simultaneous transfer connections per IP (0 = unlimited)
    #[arg(long, default_value_t = DEFAULT_MAX_TRANSFERS_PER_IP)]
    pub max_transfers_per_ip: usize,

    /// Seconds to wait for a stalled upload or download before dropping it
    #[arg(
        long,
        default_value_t = DEFAULT_PROGRESS_TIMEOUT.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub progress_timeout: u64,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, default_value = "false")]
    pub debug: bool,
}

impl Args {
    /// Fold the policy flags into a `ServerConfig`
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            max_upload_size: self.max_upload_size,
            max_transfers_per_ip: self.max_transfers_per_ip,
            progress_timeout: Duration::from_secs(self.progress_timeout),
            ..ServerConfig::default()
        }
    }
}
