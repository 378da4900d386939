//! Store that writes every call to the tracing log

use tracing::{info, warn};

use crate::Result;
use crate::collaborators::{AlertStore, IncidentStore, PositionStore};
use crate::types::{AvlRecord, DeviceId, NormalizedAlert};

/// Log-only store, used when no persistence backend is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStore;

#[async_trait::async_trait]
impl PositionStore for TracingStore {
    async fn store_position(&self, device: &DeviceId, record: &AvlRecord) -> Result<()> {
        info!(
            device = %device,
            timestamp_ms = record.timestamp_ms,
            lat = record.latitude,
            lng = record.longitude,
            speed = record.speed,
            "Position"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl IncidentStore for TracingStore {
    async fn store_panic_incident(&self, device: &DeviceId, record: &AvlRecord) -> Result<()> {
        warn!(
            device = %device,
            timestamp_ms = record.timestamp_ms,
            lat = record.latitude,
            lng = record.longitude,
            "Panic incident"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl AlertStore for TracingStore {
    async fn store_alert(&self, alert: NormalizedAlert) -> Result<()> {
        info!(
            device = %alert.device,
            alert = %alert.kind,
            priority = alert.priority.raw(),
            event_io_id = alert.event_io_id,
            io = %alert.io,
            "Alert"
        );
        Ok(())
    }
}
