//! Per-IP connection limits
//!
//! One tracker guards the transfer port and another the progress port. A
//! slot is held by an RAII guard for the life of the connection.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

type Counts = Arc<Mutex<HashMap<IpAddr, usize>>>;

/// Counts live connections per IP address
///
/// A limit of 0 means unlimited connections are allowed.
#[derive(Debug)]
pub struct ConnectionTracker {
    counts: Counts,
    max_per_ip: usize,
}

impl ConnectionTracker {
    #[must_use]
    pub fn new(max_per_ip: usize) -> Self {
        Self {
            counts: Arc::new(Mutex::new(HashMap::new())),
            max_per_ip,
        }
    }

    /// Try to take a slot for `ip`
    ///
    /// Returns `None` if the IP is already at its limit. The slot is
    /// released when the guard is dropped.
    pub fn try_acquire(&self, ip: IpAddr) -> Option<SlotGuard> {
        let mut counts = self.counts.lock().expect("connection tracker lock");
        let count = counts.entry(ip).or_insert(0);

        if self.max_per_ip > 0 && *count >= self.max_per_ip {
            return None;
        }

        *count += 1;
        Some(SlotGuard {
            ip,
            counts: Arc::clone(&self.counts),
        })
    }

    /// Live connections from `ip`
    pub fn active(&self, ip: IpAddr) -> usize {
        let counts = self.counts.lock().expect("connection tracker lock");
        counts.get(&ip).copied().unwrap_or(0)
    }
}

/// RAII guard that releases a connection slot when dropped
///
/// Slots are released even if the handler returns early or panics.
#[derive(Debug)]
pub struct SlotGuard {
    ip: IpAddr,
    counts: Counts,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut counts = self.counts.lock().expect("connection tracker lock");
        if let Some(count) = counts.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&self.ip);
            }
        }
    }
}
