//! In-memory store that records every call in arrival order

use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use crate::collaborators::{AlertStore, BatchObserver, IncidentStore, PositionStore};
use crate::types::{AvlRecord, DeviceId, NormalizedAlert};
use crate::{GatewayError, Result};

/// One collaborator call as observed by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Position(DeviceId, AvlRecord),
    PanicIncident(DeviceId, AvlRecord),
    Alert(NormalizedAlert),
    Batch(DeviceId, usize),
}

/// Store keeping all calls in a single ordered log.
///
/// Useful for embedding the gateway without persistence and for asserting
/// delivery order in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    calls: Mutex<Vec<StoreCall>>,
    changed: Notify,
    fail_positions: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose position writes fail after being recorded.
    pub fn failing_positions() -> Self {
        Self { fail_positions: true, ..Self::default() }
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    pub fn positions(&self) -> Vec<AvlRecord> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                StoreCall::Position(_, record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn incidents(&self) -> Vec<AvlRecord> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                StoreCall::PanicIncident(_, record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn alerts(&self) -> Vec<NormalizedAlert> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                StoreCall::Alert(alert) => Some(alert.clone()),
                _ => None,
            })
            .collect()
    }

    /// Wait until at least `count` calls were recorded. Returns false on timeout.
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.changed.notified();
                if self.len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    fn push(&self, call: StoreCall) {
        self.calls.lock().push(call);
        self.changed.notify_waiters();
    }
}

#[async_trait::async_trait]
impl PositionStore for MemoryStore {
    async fn store_position(&self, device: &DeviceId, record: &AvlRecord) -> Result<()> {
        self.push(StoreCall::Position(device.clone(), record.clone()));
        if self.fail_positions {
            return Err(GatewayError::store_failed("positions", "injected failure"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IncidentStore for MemoryStore {
    async fn store_panic_incident(&self, device: &DeviceId, record: &AvlRecord) -> Result<()> {
        self.push(StoreCall::PanicIncident(device.clone(), record.clone()));
        Ok(())
    }
}

#[async_trait::async_trait]
impl AlertStore for MemoryStore {
    async fn store_alert(&self, alert: NormalizedAlert) -> Result<()> {
        self.push(StoreCall::Alert(alert));
        Ok(())
    }
}

#[async_trait::async_trait]
impl BatchObserver for MemoryStore {
    async fn on_batch(&self, device: &DeviceId, records: &[AvlRecord]) {
        self.push(StoreCall::Batch(device.clone(), records.len()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertKind, Priority};

    #[tokio::test]
    async fn calls_are_logged_in_order() {
        let store = MemoryStore::new();
        let device = DeviceId::new("356307042441013");
        let record = AvlRecord::builder(5).priority(Priority::Panic).build();

        store.store_position(&device, &record).await.unwrap();
        store.store_panic_incident(&device, &record).await.unwrap();
        store.store_alert(NormalizedAlert::from_record(&device, &record, AlertKind::Panic)).await.unwrap();

        let calls = store.calls();
        assert!(matches!(calls[0], StoreCall::Position(..)));
        assert!(matches!(calls[1], StoreCall::PanicIncident(..)));
        assert!(matches!(calls[2], StoreCall::Alert(..)));
        assert_eq!(store.alerts()[0].kind, AlertKind::Panic);
    }

    #[tokio::test]
    async fn wait_for_calls_times_out() {
        let store = MemoryStore::new();
        assert!(!store.wait_for_calls(1, Duration::from_millis(20)).await);
        assert!(store.wait_for_calls(0, Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn failing_positions_still_records() {
        let store = MemoryStore::failing_positions();
        let device = DeviceId::new("1");
        assert!(store.store_position(&device, &AvlRecord::builder(0).build()).await.is_err());
        assert_eq!(store.positions().len(), 1);
    }
}
