//! Decoded AVL packet types

use super::AvlRecord;

/// The two codecs accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    /// Codec 8: one-byte I/O ids and counts
    Codec8,
    /// Codec 8 Extended: two-byte I/O ids and counts plus variable-length elements
    Codec8Extended,
}

impl CodecId {
    pub const CODEC_8: u8 = 0x08;
    pub const CODEC_8_EXTENDED: u8 = 0x8E;

    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            Self::CODEC_8 => Some(CodecId::Codec8),
            Self::CODEC_8_EXTENDED => Some(CodecId::Codec8Extended),
            _ => None,
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            CodecId::Codec8 => Self::CODEC_8,
            CodecId::Codec8Extended => Self::CODEC_8_EXTENDED,
        }
    }

    pub const fn is_extended(self) -> bool {
        matches!(self, CodecId::Codec8Extended)
    }
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecId::Codec8 => f.write_str("8"),
            CodecId::Codec8Extended => f.write_str("8E"),
        }
    }
}

/// Result of decoding one frame.
///
/// An invalid packet (CRC or record-count mismatch, truncated records) is
/// still returned; callers must check `valid` before using `records`.
#[derive(Debug, Clone, PartialEq)]
pub struct AvlPacket {
    pub codec: CodecId,
    /// Record count declared before the payload
    pub record_count: u8,
    pub records: Vec<AvlRecord>,
    pub valid: bool,
}

impl AvlPacket {
    /// Packet that failed an integrity check. Carries no records.
    pub fn rejected(codec: CodecId, record_count: u8) -> Self {
        Self { codec, record_count, records: Vec::new(), valid: false }
    }

    /// Number of records to acknowledge back to the device.
    pub fn ack_count(&self) -> u32 {
        if self.valid { self.records.len() as u32 } else { 0 }
    }
}
