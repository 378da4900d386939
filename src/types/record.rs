//! AVL record: one telemetry sample from a tracker

use serde::Serialize;

use super::io::{DIN1_IO_ID, IoElements, IoValue};

/// Divisor turning wire coordinates into degrees.
pub const COORDINATE_SCALE: f64 = 10_000_000.0;

/// Record priority as sent by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "u8")]
pub enum Priority {
    Low,
    High,
    Panic,
    Unknown(u8),
}

impl Priority {
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Priority::Low,
            1 => Priority::High,
            2 => Priority::Panic,
            other => Priority::Unknown(other),
        }
    }

    pub const fn raw(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::High => 1,
            Priority::Panic => 2,
            Priority::Unknown(other) => other,
        }
    }

    /// True for anything above `Low`, i.e. records generated by an event.
    pub const fn is_event(self) -> bool {
        self.raw() >= 1
    }

    pub const fn label(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::High => "high",
            Priority::Panic => "panic",
            Priority::Unknown(_) => "unknown",
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.raw()
    }
}

/// Convert a raw wire coordinate to degrees.
pub fn coordinate_from_raw(raw: i32) -> f64 {
    raw as f64 / COORDINATE_SCALE
}

/// Convert degrees to the wire representation, rounding to the nearest unit.
pub fn coordinate_to_raw(degrees: f64) -> i32 {
    (degrees * COORDINATE_SCALE).round() as i32
}

/// One decoded telemetry sample.
///
/// Built once through [`RecordBuilder`], which derives `is_panic`; records are
/// passed by value from the decoder to the stores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvlRecord {
    /// UTC time of the fix, epoch milliseconds
    pub timestamp_ms: u64,
    pub priority: Priority,
    /// Degrees, negative west
    pub longitude: f64,
    /// Degrees, negative south
    pub latitude: f64,
    /// Meters above sea level
    pub altitude: i16,
    /// Heading in degrees from north
    pub angle: u16,
    pub satellites: u8,
    /// km/h
    pub speed: u16,
    pub io: IoElements,
    /// I/O element that triggered the record, 0 for periodic records
    pub event_io_id: u16,
    pub is_panic: bool,
}

impl AvlRecord {
    pub fn builder(timestamp_ms: u64) -> RecordBuilder {
        RecordBuilder::new(timestamp_ms)
    }

    /// Panic derivation: priority 2, a DIN1 event, or DIN1 high.
    pub fn derive_panic(priority: Priority, event_io_id: u16, io: &IoElements) -> bool {
        priority == Priority::Panic || event_io_id == DIN1_IO_ID || io.value(DIN1_IO_ID) == Some(1)
    }
}

/// Builder for [`AvlRecord`].
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    timestamp_ms: u64,
    priority: Priority,
    longitude: f64,
    latitude: f64,
    altitude: i16,
    angle: u16,
    satellites: u8,
    speed: u16,
    io: IoElements,
    event_io_id: u16,
}

impl RecordBuilder {
    pub fn new(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            priority: Priority::Low,
            longitude: 0.0,
            latitude: 0.0,
            altitude: 0,
            angle: 0,
            satellites: 0,
            speed: 0,
            io: IoElements::new(),
            event_io_id: 0,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn position(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = latitude;
        self.longitude = longitude;
        self
    }

    pub fn altitude(mut self, altitude: i16) -> Self {
        self.altitude = altitude;
        self
    }

    pub fn angle(mut self, angle: u16) -> Self {
        self.angle = angle;
        self
    }

    pub fn satellites(mut self, satellites: u8) -> Self {
        self.satellites = satellites;
        self
    }

    pub fn speed(mut self, speed: u16) -> Self {
        self.speed = speed;
        self
    }

    pub fn event_io_id(mut self, id: u16) -> Self {
        self.event_io_id = id;
        self
    }

    pub fn io(mut self, id: u16, value: IoValue) -> Self {
        self.io.insert(id, value);
        self
    }

    pub fn io_elements(mut self, io: IoElements) -> Self {
        self.io = io;
        self
    }

    pub fn build(self) -> AvlRecord {
        let is_panic = AvlRecord::derive_panic(self.priority, self.event_io_id, &self.io);
        AvlRecord {
            timestamp_ms: self.timestamp_ms,
            priority: self.priority,
            longitude: self.longitude,
            latitude: self.latitude,
            altitude: self.altitude,
            angle: self.angle,
            satellites: self.satellites,
            speed: self.speed,
            io: self.io,
            event_io_id: self.event_io_id,
            is_panic,
        }
    }
}
