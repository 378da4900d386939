//! I/O element values carried by AVL records

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Digital input 1, wired to the panic button on most installations.
pub const DIN1_IO_ID: u16 = 0x0001;

/// Ignition state element.
pub const IGNITION_IO_ID: u16 = 0x004E;

/// An I/O element value with the width it was transmitted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
}

impl IoValue {
    /// Width in bytes on the wire.
    pub const fn width(&self) -> usize {
        match self {
            IoValue::U8(_) => 1,
            IoValue::U16(_) => 2,
            IoValue::U32(_) => 4,
            IoValue::U64(_) => 8,
        }
    }

    /// Value widened to u64.
    pub const fn as_u64(&self) -> u64 {
        match *self {
            IoValue::U8(v) => v as u64,
            IoValue::U16(v) => v as u64,
            IoValue::U32(v) => v as u64,
            IoValue::U64(v) => v,
        }
    }

    /// Read a big-endian value of width 1, 2, 4 or 8. Other widths yield `None`.
    pub fn from_be_slice(bytes: &[u8]) -> Option<Self> {
        match *bytes {
            [a] => Some(IoValue::U8(a)),
            [a, b] => Some(IoValue::U16(u16::from_be_bytes([a, b]))),
            [a, b, c, d] => Some(IoValue::U32(u32::from_be_bytes([a, b, c, d]))),
            [a, b, c, d, e, f, g, h] => Some(IoValue::U64(u64::from_be_bytes([a, b, c, d, e, f, g, h]))),
            _ => None,
        }
    }

    /// Append the big-endian encoding to `out`.
    pub fn write_be(&self, out: &mut Vec<u8>) {
        match *self {
            IoValue::U8(v) => out.push(v),
            IoValue::U16(v) => out.extend_from_slice(&v.to_be_bytes()),
            IoValue::U32(v) => out.extend_from_slice(&v.to_be_bytes()),
            IoValue::U64(v) => out.extend_from_slice(&v.to_be_bytes()),
        }
    }
}

impl std::fmt::Display for IoValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u64())
    }
}

impl Serialize for IoValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.as_u64())
    }
}

/// Mapping from I/O element id to value, ordered by id.
///
/// A later element with the same id replaces an earlier one, as devices do
/// not repeat ids within a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IoElements(BTreeMap<u16, IoValue>);

impl IoElements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u16, value: IoValue) -> Option<IoValue> {
        self.0.insert(id, value)
    }

    pub fn get(&self, id: u16) -> Option<IoValue> {
        self.0.get(&id).copied()
    }

    /// Value of `id` widened to u64.
    pub fn value(&self, id: u16) -> Option<u64> {
        self.get(id).map(|v| v.as_u64())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, IoValue)> + '_ {
        self.0.iter().map(|(id, value)| (*id, *value))
    }

    /// Elements of one wire width, in id order.
    pub fn of_width(&self, width: usize) -> impl Iterator<Item = (u16, IoValue)> + '_ {
        self.iter().filter(move |(_, value)| value.width() == width)
    }
}

impl FromIterator<(u16, IoValue)> for IoElements {
    fn from_iter<I: IntoIterator<Item = (u16, IoValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl std::fmt::Display for IoElements {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for (i, (id, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", id, value)?;
        }
        f.write_str("}")
    }
}
