//! Collaborator traits for the systems around the ingestion core
//!
//! The gateway does not persist or broadcast anything itself. Decoded records
//! and alerts are handed to these traits; the device whitelist is consulted
//! through [`DeviceRegistry`]. Implementations are shared by every connection
//! and must tolerate arbitrary concurrent calls.

use std::sync::Arc;

use crate::Result;
use crate::types::{AvlRecord, DeviceId, NormalizedAlert};

/// Source of truth for which devices may connect.
#[async_trait::async_trait]
pub trait DeviceRegistry: Send + Sync + 'static {
    /// Returns:
    /// - `Ok(true)` - device is known
    /// - `Ok(false)` - device is explicitly not allowed
    /// - `Err(e)` - the lookup itself failed
    async fn is_authorized(&self, device: &DeviceId) -> Result<bool>;
}

/// Receives every decoded record.
#[async_trait::async_trait]
pub trait PositionStore: Send + Sync + 'static {
    async fn store_position(&self, device: &DeviceId, record: &AvlRecord) -> Result<()>;
}

/// Receives records flagged `is_panic`, after the position store.
#[async_trait::async_trait]
pub trait IncidentStore: Send + Sync + 'static {
    async fn store_panic_incident(&self, device: &DeviceId, record: &AvlRecord) -> Result<()>;
}

/// Receives classified alerts for persistence and broadcast.
#[async_trait::async_trait]
pub trait AlertStore: Send + Sync + 'static {
    async fn store_alert(&self, alert: NormalizedAlert) -> Result<()>;
}

/// Notified once per acknowledged frame, after its records were stored.
#[async_trait::async_trait]
pub trait BatchObserver: Send + Sync + 'static {
    async fn on_batch(&self, device: &DeviceId, records: &[AvlRecord]);
}

/// The downstream collaborators a connection forwards records to.
#[derive(Clone)]
pub struct Collaborators {
    pub positions: Arc<dyn PositionStore>,
    pub incidents: Arc<dyn IncidentStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub observer: Option<Arc<dyn BatchObserver>>,
}

impl Collaborators {
    pub fn new(
        positions: Arc<dyn PositionStore>,
        incidents: Arc<dyn IncidentStore>,
        alerts: Arc<dyn AlertStore>,
    ) -> Self {
        Self { positions, incidents, alerts, observer: None }
    }

    /// Use one value for all three stores.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: PositionStore + IncidentStore + AlertStore,
    {
        Self::new(store.clone(), store.clone(), store)
    }

    pub fn with_observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").field("observer", &self.observer.is_some()).finish_non_exhaustive()
    }
}
