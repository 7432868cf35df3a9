//! Transfer coordination
//!
//! `TransferCoordinator` sequences the ingest and egress flows over the
//! object store, the ledger and the progress hub, and carries the
//! administrative pass-throughs.

mod admin;
mod disposition;
mod egress;
mod ingest;
mod meter;
mod mime;
mod state;

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::db::TransferLedger;
use crate::hub::ProgressHub;
use crate::store::ObjectStore;

pub use admin::Listing;
pub use disposition::content_disposition;
pub use egress::{DeliveryReport, OpenedTransfer};
pub use ingest::{CreatedTransfer, IngestRequest, PreparedIngest};
pub use meter::{MeterConfig, ProgressMeter, SpeedCalculator};
pub use mime::detect_mime_type;
pub use state::{TransferDirection, TransferLifecycle, TransferState};

/// Orchestrates transfers across store, ledger and hub
///
/// Built once at startup; the hub is injected so the progress endpoint can
/// share it.
pub struct TransferCoordinator {
    config: ServerConfig,
    ledger: TransferLedger,
    store: ObjectStore,
    hub: Arc<ProgressHub>,
}

impl TransferCoordinator {
    pub fn new(
        config: ServerConfig,
        ledger: TransferLedger,
        store: ObjectStore,
        hub: Arc<ProgressHub>,
    ) -> Self {
        Self {
            config,
            ledger,
            store,
            hub,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &TransferLedger {
        &self.ledger
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn hub(&self) -> &Arc<ProgressHub> {
        &self.hub
    }
}
