//! Runtime policy values

use std::time::Duration;

use keydrop_common::DEFAULT_MAX_UPLOAD_SIZE;
use keydrop_common::io::DEFAULT_REQUEST_TIMEOUT;

use crate::constants::{
    DEFAULT_MAX_TRANSFERS_PER_IP, DEFAULT_PROGRESS_TIMEOUT, DEFAULT_TICK_BYTES,
    DEFAULT_TICK_INTERVAL, KEY_GENERATION_ATTEMPTS,
};
use crate::transfers::MeterConfig;

/// Policy shared by the coordinator and the request surfaces
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest object accepted, in bytes
    pub max_upload_size: u64,
    /// Minimum time between progress ticks
    pub tick_interval: Duration,
    /// Bytes moved that force a progress tick
    pub tick_bytes: u64,
    /// Key inserts attempted before giving up
    pub key_attempts: u32,
    /// Simultaneous transfer connections per IP (0 = unlimited)
    pub max_transfers_per_ip: usize,
    /// Time a client has to send its request line
    pub request_timeout: Duration,
    /// Longest wait for one chunk to be read from an uploader or accepted
    /// by a downloader
    pub progress_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            tick_interval: DEFAULT_TICK_INTERVAL,
            tick_bytes: DEFAULT_TICK_BYTES,
            key_attempts: KEY_GENERATION_ATTEMPTS,
            max_transfers_per_ip: DEFAULT_MAX_TRANSFERS_PER_IP,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            progress_timeout: DEFAULT_PROGRESS_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn meter_config(&self) -> MeterConfig {
        MeterConfig {
            interval: self.tick_interval,
            bytes: self.tick_bytes,
        }
    }
}
