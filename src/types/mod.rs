//! Core types for decoded AVL telemetry.
//!
//! The type system mirrors the Teltonika AVL wire structures:
//! - [`AvlPacket`] is one decoded frame: codec, declared count, records, validity
//! - [`AvlRecord`] is one GPS fix with its I/O elements
//! - [`IoValue`] keeps the width an I/O element was transmitted in
//! - [`NormalizedAlert`] is the classifier's output for the alert store
//!
//! ## Usage Example
//!
//! ```rust
//! use avl_gateway::types::{AvlRecord, IoValue, Priority, DIN1_IO_ID};
//!
//! let record = AvlRecord::builder(1_560_161_086_000)
//!     .priority(Priority::High)
//!     .position(-12.0464, -77.0428)
//!     .io(DIN1_IO_ID, IoValue::U8(1))
//!     .build();
//!
//! assert!(record.is_panic);
//! assert_eq!(record.io.value(DIN1_IO_ID), Some(1));
//! ```

mod alert;
mod device;
mod io;
mod packet;
mod record;

pub use alert::{AlertKind, NormalizedAlert};
pub use device::{DeviceId, IMEI_LEN};
pub use io::{DIN1_IO_ID, IGNITION_IO_ID, IoElements, IoValue};
pub use packet::{AvlPacket, CodecId};
pub use record::{
    AvlRecord, COORDINATE_SCALE, Priority, RecordBuilder, coordinate_from_raw, coordinate_to_raw,
};
