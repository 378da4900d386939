//! Alert classification of decoded records
//!
//! Maps a record to at most one [`NormalizedAlert`] by fixed precedence:
//!
//! 1. priority 2 (panic) always yields [`AlertKind::Panic`]
//! 2. the record's event I/O id, looked up in the event table
//! 3. priority 1 with a mapped event I/O id (same table, kept as its own step)
//! 4. for event records only (priority >= 1), the first `(io id, value)`
//!    condition that matches, in table order
//!
//! Periodic records (priority 0) never reach step 4, so default or zero I/O
//! values do not raise alerts.
//!
//! Both tables live in an [`AlertRules`] value built at startup and shared
//! read-only by every connection. Firmware variants that expose different
//! I/O semantics register extra entries there.

use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use crate::types::{AlertKind, AvlRecord, DeviceId, NormalizedAlert, Priority};

/// `(event I/O id → alert)` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventMapping {
    pub event_io_id: u16,
    pub alert: AlertKind,
}

/// `(I/O id, value → alert)` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IoCondition {
    pub io_id: u16,
    pub value: u64,
    pub alert: AlertKind,
}

/// Event-trigger and I/O-condition tables.
#[derive(Debug, Clone, Default)]
pub struct AlertRules {
    events: HashMap<u16, AlertKind>,
    conditions: Vec<IoCondition>,
}

impl AlertRules {
    /// Tables with no entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Mappings for FMB920/FMC920/FMU920 firmware.
    pub fn teltonika_defaults() -> Self {
        let mut rules = Self::empty();

        for (id, kind) in [
            (37, AlertKind::Panic),
            (22, AlertKind::Overspeed),
            (66, AlertKind::GnssJamming),
            (78, AlertKind::EcoDriving),
            (252, AlertKind::Crash),
            (253, AlertKind::Crash),
            (254, AlertKind::Crash),
            (2, AlertKind::Tampering),
            (16, AlertKind::GsmFail),
            (24, AlertKind::Geofence),
            (251, AlertKind::Towing),
            (249, AlertKind::Unplug),
            (250, AlertKind::ExcessiveIdling),
            (248, AlertKind::Trip),
            (247, AlertKind::Immobilizer),
            (246, AlertKind::Jamming),
        ] {
            rules.register_event(id, kind);
        }

        // DIN1 raises panic at either level: the button may be wired to +V or to ground.
        for (id, value, kind) in [
            (1, 1, AlertKind::Panic),
            (1, 0, AlertKind::Panic),
            (69, 4, AlertKind::GnssJamming),
            (78, 0, AlertKind::IgnitionOff),
            (78, 1, AlertKind::IgnitionOn),
            (182, 1, AlertKind::Overspeed),
            (199, 4, AlertKind::GnssJamming),
            (239, 1, AlertKind::Overspeed),
        ] {
            rules.register_io_condition(id, value, kind);
        }

        rules
    }

    /// Map an event I/O id to an alert, replacing any previous mapping.
    pub fn register_event(&mut self, event_io_id: u16, kind: AlertKind) -> Option<AlertKind> {
        self.events.insert(event_io_id, kind)
    }

    /// Add an I/O condition.
    ///
    /// Conditions are evaluated by ascending I/O id, then in registration
    /// order within an id.
    pub fn register_io_condition(&mut self, io_id: u16, value: u64, kind: AlertKind) {
        let at = self.conditions.partition_point(|c| c.io_id <= io_id);
        self.conditions.insert(at, IoCondition { io_id, value, alert: kind });
    }

    /// Apply configured entries on top of the current tables.
    pub fn extend(&mut self, events: &[EventMapping], conditions: &[IoCondition]) {
        for mapping in events {
            self.register_event(mapping.event_io_id, mapping.alert.clone());
        }
        for condition in conditions {
            self.register_io_condition(condition.io_id, condition.value, condition.alert.clone());
        }
    }

    pub fn event_kind(&self, event_io_id: u16) -> Option<&AlertKind> {
        self.events.get(&event_io_id)
    }

    pub fn conditions(&self) -> &[IoCondition] {
        &self.conditions
    }

    /// Classify one record. Pure: no I/O, no state.
    pub fn classify(&self, device: &DeviceId, record: &AvlRecord) -> Option<NormalizedAlert> {
        let kind = self.alert_kind(record)?;
        debug!(
            device = %device,
            alert = %kind,
            priority = record.priority.raw(),
            event_io_id = record.event_io_id,
            "Record classified"
        );
        Some(NormalizedAlert::from_record(device, record, kind.clone()))
    }

    fn alert_kind(&self, record: &AvlRecord) -> Option<&AlertKind> {
        if record.priority == Priority::Panic {
            return Some(&PANIC);
        }

        if let Some(kind) = self.event_kind(record.event_io_id) {
            return Some(kind);
        }

        if record.priority == Priority::High {
            if let Some(kind) = self.event_kind(record.event_io_id) {
                return Some(kind);
            }
        }

        if !record.priority.is_event() {
            return None;
        }

        self.conditions
            .iter()
            .find(|c| record.io.value(c.io_id) == Some(c.value))
            .map(|c| &c.alert)
    }
}

static PANIC: AlertKind = AlertKind::Panic;

/// Classify `record` against `rules`.
pub fn classify(rules: &AlertRules, device: &DeviceId, record: &AvlRecord) -> Option<NormalizedAlert> {
    rules.classify(device, record)
}
