//! Semantic alert types produced by the classifier

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::str::FromStr;

use super::{AvlRecord, DeviceId, IoElements, Priority};

/// Alert type tag.
///
/// Serialized as its snake_case name. Names registered at runtime that are not
/// known here round-trip through [`AlertKind::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum AlertKind {
    Panic,
    Overspeed,
    GnssJamming,
    Jamming,
    EcoDriving,
    Crash,
    Tampering,
    GsmFail,
    Geofence,
    Towing,
    Unplug,
    ExcessiveIdling,
    Trip,
    Immobilizer,
    IgnitionOn,
    IgnitionOff,
    Custom(String),
}

impl AlertKind {
    pub fn as_str(&self) -> &str {
        match self {
            AlertKind::Panic => "panic",
            AlertKind::Overspeed => "overspeed",
            AlertKind::GnssJamming => "gnss_jamming",
            AlertKind::Jamming => "jamming",
            AlertKind::EcoDriving => "eco_driving",
            AlertKind::Crash => "crash",
            AlertKind::Tampering => "tampering",
            AlertKind::GsmFail => "gsm_fail",
            AlertKind::Geofence => "geofence",
            AlertKind::Towing => "towing",
            AlertKind::Unplug => "unplug",
            AlertKind::ExcessiveIdling => "excessive_idling",
            AlertKind::Trip => "trip",
            AlertKind::Immobilizer => "immobilizer",
            AlertKind::IgnitionOn => "ignition_on",
            AlertKind::IgnitionOff => "ignition_off",
            AlertKind::Custom(name) => name,
        }
    }
}

impl FromStr for AlertKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "panic" => AlertKind::Panic,
            "overspeed" => AlertKind::Overspeed,
            "gnss_jamming" => AlertKind::GnssJamming,
            "jamming" => AlertKind::Jamming,
            "eco_driving" => AlertKind::EcoDriving,
            "crash" => AlertKind::Crash,
            "tampering" => AlertKind::Tampering,
            "gsm_fail" => AlertKind::GsmFail,
            "geofence" => AlertKind::Geofence,
            "towing" => AlertKind::Towing,
            "unplug" => AlertKind::Unplug,
            "excessive_idling" => AlertKind::ExcessiveIdling,
            "trip" => AlertKind::Trip,
            "immobilizer" => AlertKind::Immobilizer,
            "ignition_on" => AlertKind::IgnitionOn,
            "ignition_off" => AlertKind::IgnitionOff,
            other => AlertKind::Custom(other.to_string()),
        })
    }
}

impl From<String> for AlertKind {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl From<AlertKind> for String {
    fn from(kind: AlertKind) -> Self {
        match kind {
            AlertKind::Custom(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert handed to the alert store for persistence and broadcast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedAlert {
    pub device: DeviceId,
    pub timestamp_ms: u64,
    pub kind: AlertKind,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: u16,
    pub event_io_id: u16,
    pub priority: Priority,
    /// Complete I/O map of the originating record, for audit
    pub io: IoElements,
}

impl NormalizedAlert {
    pub fn from_record(device: &DeviceId, record: &AvlRecord, kind: AlertKind) -> Self {
        Self {
            device: device.clone(),
            timestamp_ms: record.timestamp_ms,
            kind,
            latitude: record.latitude,
            longitude: record.longitude,
            speed: record.speed,
            event_io_id: record.event_io_id,
            priority: record.priority,
            io: record.io.clone(),
        }
    }
}
