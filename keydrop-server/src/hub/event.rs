//! Events routed by the progress hub

use keydrop_common::protocol::ServerMessage;
use keydrop_common::{ProgressEvent, TransferKey};

/// One event delivered to a subscribed session
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    Progress {
        key: TransferKey,
        progress: ProgressEvent,
    },
    /// Terminal: the transfer finished
    Complete { key: TransferKey },
    /// Terminal: the transfer failed
    Failed { key: TransferKey, reason: String },
}

impl HubEvent {
    /// Key of the transfer this event belongs to
    pub fn key(&self) -> &TransferKey {
        match self {
            Self::Progress { key, .. } | Self::Complete { key } | Self::Failed { key, .. } => key,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

impl From<HubEvent> for ServerMessage {
    fn from(event: HubEvent) -> Self {
        match event {
            HubEvent::Progress { key, progress } => ServerMessage::Progress { key, progress },
            HubEvent::Complete { key } => ServerMessage::TransferComplete { key },
            HubEvent::Failed { key, reason } => ServerMessage::TransferFailed { key, reason },
        }
    }
}
