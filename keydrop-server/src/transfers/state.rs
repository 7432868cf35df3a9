//! Per-transfer lifecycle
//!
//! `Initiated -> InProgress -> Completed | Failed`. A failure may also
//! happen straight from `Initiated`. Terminal states are entered once.

use std::fmt;
use std::time::Instant;

use keydrop_common::TransferKey;

/// Direction of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Client sending an object to the server
    Ingest,
    /// Server sending an object to a client
    Egress,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingest => write!(f, "ingest"),
            Self::Egress => write!(f, "egress"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Initiated,
    InProgress,
    Completed,
    Failed,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal step
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Initiated, Self::InProgress)
                | (Self::Initiated, Self::Failed)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initiated => "initiated",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Lifecycle of one running transfer
#[derive(Debug)]
pub struct TransferLifecycle {
    key: TransferKey,
    direction: TransferDirection,
    state: TransferState,
    started_at: Instant,
}

impl TransferLifecycle {
    /// Start tracking a transfer in `Initiated`
    pub fn initiate(key: TransferKey, direction: TransferDirection) -> Self {
        tracing::debug!(key = %key, direction = %direction, "transfer initiated");
        Self {
            key,
            direction,
            state: TransferState::Initiated,
            started_at: Instant::now(),
        }
    }

    pub fn key(&self) -> &TransferKey {
        &self.key
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Swap the key before any terminal state (provisional key replaced)
    pub fn rekey(&mut self, key: TransferKey) {
        self.key = key;
    }

    /// Move to `InProgress`; no-op if already there
    pub fn start(&mut self) {
        self.advance(TransferState::InProgress);
    }

    /// Move to `Completed`; returns false if the transfer already ended
    pub fn complete(&mut self, bytes: u64) -> bool {
        self.start();
        let moved = self.advance(TransferState::Completed);
        if moved {
            tracing::debug!(
                key = %self.key,
                direction = %self.direction,
                bytes,
                elapsed_ms = self.started_at.elapsed().as_millis() as u64,
                "transfer completed"
            );
        }
        moved
    }

    /// Move to `Failed`; returns false if the transfer already ended
    pub fn fail(&mut self, bytes: u64, reason: &str) -> bool {
        let moved = self.advance(TransferState::Failed);
        if moved {
            tracing::debug!(
                key = %self.key,
                direction = %self.direction,
                bytes,
                reason,
                "transfer failed"
            );
        }
        moved
    }

    fn advance(&mut self, next: TransferState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}
