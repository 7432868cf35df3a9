//! Progress event shape shared by the server and subscribers

use serde::{Deserialize, Serialize};

/// Estimated time remaining for a transfer
///
/// Serialized as a number of seconds, or `null` when unknown. Never carries
/// NaN or infinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<u64>", into = "Option<u64>")]
pub enum Eta {
    /// Throughput is zero or not yet measurable
    Unknown,
    /// Whole seconds remaining (rounded up)
    Seconds(u64),
}

impl Eta {
    /// Compute an ETA from the remaining byte count and current throughput
    ///
    /// Returns `Eta::Unknown` if throughput is not a finite positive number.
    #[must_use]
    pub fn from_rate(remaining_bytes: u64, bytes_per_second: f64) -> Self {
        if !bytes_per_second.is_finite() || bytes_per_second <= 0.0 {
            return Self::Unknown;
        }
        let secs = (remaining_bytes as f64 / bytes_per_second).ceil();
        if !secs.is_finite() || secs < 0.0 {
            return Self::Unknown;
        }
        Self::Seconds(secs as u64)
    }

    /// Seconds remaining, if known
    #[must_use]
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            Self::Unknown => None,
            Self::Seconds(s) => Some(*s),
        }
    }
}

impl From<Option<u64>> for Eta {
    fn from(value: Option<u64>) -> Self {
        value.map_or(Self::Unknown, Self::Seconds)
    }
}

impl From<Eta> for Option<u64> {
    fn from(eta: Eta) -> Self {
        eta.as_secs()
    }
}

/// One snapshot of a transfer's completion state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Completion percentage, 0..=100
    pub progress_percent: u8,
    /// Bytes moved so far
    pub bytes_transferred: u64,
    /// Total bytes expected (0 if unknown)
    pub total_bytes: u64,
    /// Average throughput over the recent window; always finite and >= 0
    pub throughput_bytes_per_second: f64,
    /// Estimated time remaining
    pub eta_seconds: Eta,
    /// True when progress counts bytes handed to the transport rather than
    /// bytes confirmed by the peer
    #[serde(default)]
    pub estimated: bool,
}

impl ProgressEvent {
    /// Build an event, clamping every field into its valid range
    #[must_use]
    pub fn new(
        bytes_transferred: u64,
        total_bytes: u64,
        throughput_bytes_per_second: f64,
        estimated: bool,
    ) -> Self {
        let throughput = if throughput_bytes_per_second.is_finite() {
            throughput_bytes_per_second.max(0.0)
        } else {
            0.0
        };
        let remaining = total_bytes.saturating_sub(bytes_transferred);
        let eta_seconds = if remaining == 0 && total_bytes > 0 {
            Eta::Seconds(0)
        } else {
            Eta::from_rate(remaining, throughput)
        };

        Self {
            progress_percent: percent(bytes_transferred, total_bytes),
            bytes_transferred,
            total_bytes,
            throughput_bytes_per_second: throughput,
            eta_seconds,
            estimated,
        }
    }

    /// Whether every byte has been moved
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.total_bytes > 0 && self.bytes_transferred >= self.total_bytes
    }
}

/// Completion percentage in 0..=100 (0 when the total is unknown)
fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (u128::from(done.min(total)) * 100) / u128::from(total);
    pct as u8
}
