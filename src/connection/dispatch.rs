//! Ordered hand-off of decoded records to the collaborators
//!
//! Each connection owns one [`Dispatcher`]. Batches are queued without
//! waiting, so a slow store never delays the acknowledgement of the next
//! frame, and a single task drains the queue so store calls keep wire order.
//! Dropping the dispatcher lets queued batches finish in the background.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::classifier::AlertRules;
use crate::collaborators::Collaborators;
use crate::types::{AvlRecord, DIN1_IO_ID, DeviceId, IGNITION_IO_ID};

#[derive(Debug)]
struct Batch {
    device: DeviceId,
    records: Vec<AvlRecord>,
}

/// Per-connection record queue.
#[derive(Debug)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Batch>,
}

impl Dispatcher {
    /// Start the delivery task. It inherits the caller's tracing span.
    pub fn spawn(rules: Arc<AlertRules>, collaborators: Collaborators) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::run(rx, rules, collaborators).in_current_span());
        (Self { tx }, task)
    }

    /// Queue one acknowledged frame. Returns false if the delivery task is gone.
    pub fn dispatch(&self, device: DeviceId, records: Vec<AvlRecord>) -> bool {
        self.tx.send(Batch { device, records }).is_ok()
    }

    async fn run(mut rx: mpsc::UnboundedReceiver<Batch>, rules: Arc<AlertRules>, collaborators: Collaborators) {
        let mut batches = 0u64;
        while let Some(batch) = rx.recv().await {
            deliver_batch(&rules, &collaborators, &batch.device, &batch.records).await;
            batches += 1;
        }
        debug!(batches, "Dispatcher drained");
    }
}

/// Forward one frame's records, in order, then notify the batch observer.
///
/// For each record: position store, then the incident store when the record
/// is a panic, then the classifier and alert store. A failing store is logged
/// and does not stop the remaining calls.
pub async fn deliver_batch(rules: &AlertRules, collaborators: &Collaborators, device: &DeviceId, records: &[AvlRecord]) {
    for (index, record) in records.iter().enumerate() {
        log_record(device, index + 1, record);

        if let Err(e) = collaborators.positions.store_position(device, record).await {
            warn!(device = %device, error = %e, "Position store failed, continuing with alerts");
        }

        if record.is_panic {
            if let Err(e) = collaborators.incidents.store_panic_incident(device, record).await {
                error!(device = %device, error = %e, "Panic incident store failed");
            }
        }

        match rules.classify(device, record) {
            Some(alert) => {
                info!(
                    device = %device,
                    alert = %alert.kind,
                    priority = alert.priority.raw(),
                    event_io_id = alert.event_io_id,
                    "Alert detected"
                );
                if let Err(e) = collaborators.alerts.store_alert(alert).await {
                    error!(device = %device, error = %e, "Alert store failed");
                }
            }
            None if record.priority.is_event() || record.event_io_id != 0 => {
                info!(
                    device = %device,
                    priority = record.priority.raw(),
                    event_io_id = record.event_io_id,
                    io = %record.io,
                    "No alert"
                );
            }
            None => {}
        }
    }

    if let Some(observer) = &collaborators.observer {
        observer.on_batch(device, records).await;
    }
}

fn log_record(device: &DeviceId, index: usize, record: &AvlRecord) {
    debug!(
        device = %device,
        rec = index,
        timestamp_ms = record.timestamp_ms,
        lat = format_args!("{:.5}", record.latitude),
        lng = format_args!("{:.5}", record.longitude),
        speed = record.speed,
        sat = record.satellites,
        priority = record.priority.label(),
        event_io_id = record.event_io_id,
        ignition = ?record.io.value(IGNITION_IO_ID),
        din1 = ?record.io.value(DIN1_IO_ID),
        is_panic = record.is_panic,
        io = %record.io,
        "AVL record"
    );
}
