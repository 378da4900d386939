//! Shared fixtures for unit tests and benchmarks
//!
//! The sample packets are the reference frames from the Teltonika Codec 8 and
//! Codec 8 Extended protocol documentation.

#![cfg(any(test, feature = "benchmark"))]

use crate::codec::encode_identifier;
use crate::types::{AvlRecord, DIN1_IO_ID, DeviceId, IoValue, Priority};

/// Codec 8 documentation sample, one record, CRC `0xC7CF`.
pub const CODEC8_SAMPLE: &str = "000000000000003608010000016B40D8EA30010000000000000000000000000000000105021503010101425E0F01F10000601A014E0000000000000000010000C7CF";

/// Codec 8 Extended documentation sample, one record, CRC `0x2994`.
pub const CODEC8E_SAMPLE: &str = "000000000000004A8E010000016B412CEE000100000000000000000000000000000000010005000100010100010011001D00010010015E2C880002000B000000003544C87A000E000000001DD7E06A00000100002994";

/// IMEI used throughout the tests.
pub const TEST_IMEI: &str = "356307042441013";

/// Decode a hex string. Panics on malformed input.
pub fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap_or_else(|_| panic!("bad hex at {}", i)))
        .collect()
}

pub fn test_device() -> DeviceId {
    DeviceId::new(TEST_IMEI)
}

/// Login handshake bytes for [`TEST_IMEI`].
pub fn handshake() -> Vec<u8> {
    encode_identifier(&test_device()).unwrap_or_default()
}

/// Panic button press: priority 2, DIN1 high, parked in Lima.
pub fn panic_record(timestamp_ms: u64) -> AvlRecord {
    AvlRecord::builder(timestamp_ms)
        .priority(Priority::Panic)
        .position(-12.0464, -77.0428)
        .altitude(154)
        .angle(90)
        .satellites(9)
        .speed(0)
        .io(DIN1_IO_ID, IoValue::U8(1))
        .build()
}

/// Periodic report with no event.
pub fn periodic_record(timestamp_ms: u64) -> AvlRecord {
    AvlRecord::builder(timestamp_ms)
        .priority(Priority::Low)
        .position(-12.05, -77.03)
        .satellites(11)
        .speed(42)
        .io(DIN1_IO_ID, IoValue::U8(0))
        .build()
}
