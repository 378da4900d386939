//! Frame decoder for Codec 8 and Codec 8 Extended AVL packets
//!
//! ## Frame layout
//!
//! ```text
//! [u32 0x00000000][u32 data field length]
//! [u8 codec id][u8 record count][records ...][u8 record count]   <- CRC-covered data field
//! [u16 0x0000][u16 CRC-16]
//! ```
//!
//! The decoder expects a buffer believed to hold one complete frame. It never
//! panics on malformed input: records that would read past the payload end
//! are dropped and the packet is marked invalid.

use thiserror::Error;
use tracing::{debug, trace};

use super::reader::ByteReader;
use crate::crc::crc16;
use crate::types::{AvlPacket, AvlRecord, CodecId, IoElements, IoValue, Priority, coordinate_from_raw};

/// Preamble plus data field length.
pub const HEADER_LEN: usize = 8;

/// CRC field as transmitted (upper two bytes are zero padding).
pub const CRC_FIELD_LEN: usize = 4;

/// Codec id, record count and the trailing count repeat.
pub const DATA_FIELD_OVERHEAD: u32 = 3;

/// Offset of the first record.
pub const RECORDS_OFFSET: usize = HEADER_LEN + 2;

/// Why a buffer could not be decoded at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("buffer holds {available} of {required} bytes")]
    Incomplete { required: usize, available: usize },

    #[error("preamble is not zero")]
    BadPreamble,

    #[error("data field of {0} bytes cannot hold codec id and record counts")]
    DataFieldTooShort(u32),

    #[error("unknown codec id {0:#04x}")]
    UnknownCodec(u8),
}

/// Total frame size for a declared data field length.
pub fn frame_len(data_field_length: u32) -> usize {
    HEADER_LEN + data_field_length as usize + CRC_FIELD_LEN
}

/// Decode one frame, discarding the reason on failure.
///
/// Returns `None` when the buffer is too short, has a non-zero preamble or an
/// unknown codec. Integrity failures still return a packet with `valid == false`.
pub fn decode(buffer: &[u8]) -> Option<AvlPacket> {
    decode_frame(buffer).ok()
}

/// Decode one frame.
pub fn decode_frame(buffer: &[u8]) -> Result<AvlPacket, DecodeError> {
    let mut header = ByteReader::new(buffer);
    let (preamble, data_field_length) = match (header.u32(), header.u32()) {
        (Some(p), Some(l)) => (p, l),
        _ => return Err(DecodeError::Incomplete { required: HEADER_LEN, available: buffer.len() }),
    };
    if preamble != 0 {
        return Err(DecodeError::BadPreamble);
    }

    let required = frame_len(data_field_length);
    if buffer.len() < required {
        return Err(DecodeError::Incomplete { required, available: buffer.len() });
    }
    if data_field_length < DATA_FIELD_OVERHEAD {
        return Err(DecodeError::DataFieldTooShort(data_field_length));
    }

    let data_end = HEADER_LEN + data_field_length as usize;
    let codec_raw = buffer[HEADER_LEN];
    let codec = CodecId::from_u8(codec_raw).ok_or(DecodeError::UnknownCodec(codec_raw))?;
    let record_count = buffer[HEADER_LEN + 1];

    let received_crc = u16::from_be_bytes([buffer[data_end + 2], buffer[data_end + 3]]);
    let computed_crc = crc16(&buffer[HEADER_LEN..data_end]);
    let count_repeat = buffer[data_end - 1];

    if computed_crc != received_crc || count_repeat != record_count {
        debug!(
            codec = %codec,
            received_crc = format_args!("{:#06x}", received_crc),
            computed_crc = format_args!("{:#06x}", computed_crc),
            record_count,
            count_repeat,
            "Frame failed integrity check"
        );
        return Ok(AvlPacket::rejected(codec, record_count));
    }

    // Records end where the count repeat begins.
    let mut reader = ByteReader::new(&buffer[RECORDS_OFFSET..data_end - 1]);
    let mut records = Vec::with_capacity(record_count as usize);
    for index in 0..record_count {
        match decode_record(&mut reader, codec) {
            Some(record) => records.push(record),
            None => {
                debug!(codec = %codec, index, record_count, "Record truncated, stopping decode");
                break;
            }
        }
    }

    let valid = records.len() == record_count as usize;
    trace!(codec = %codec, records = records.len(), valid, "Decoded frame");

    Ok(AvlPacket { codec, record_count, records, valid })
}

fn decode_record(reader: &mut ByteReader<'_>, codec: CodecId) -> Option<AvlRecord> {
    let timestamp_ms = reader.u64()?;
    let priority = Priority::from_u8(reader.u8()?);
    let longitude = coordinate_from_raw(reader.i32()?);
    let latitude = coordinate_from_raw(reader.i32()?);
    let altitude = reader.i16()?;
    let angle = reader.u16()?;
    let satellites = reader.u8()?;
    let speed = reader.u16()?;
    let (event_io_id, io) = decode_io_elements(reader, codec)?;

    Some(
        AvlRecord::builder(timestamp_ms)
            .priority(priority)
            .position(latitude, longitude)
            .altitude(altitude)
            .angle(angle)
            .satellites(satellites)
            .speed(speed)
            .event_io_id(event_io_id)
            .io_elements(io)
            .build(),
    )
}

/// Ids and counts are one byte in Codec 8, two in Codec 8E.
fn read_id(reader: &mut ByteReader<'_>, codec: CodecId) -> Option<u16> {
    if codec.is_extended() { reader.u16() } else { reader.u8().map(u16::from) }
}

fn decode_io_elements(reader: &mut ByteReader<'_>, codec: CodecId) -> Option<(u16, IoElements)> {
    let event_io_id = read_id(reader, codec)?;
    let _total = read_id(reader, codec)?;

    let mut io = IoElements::new();
    for width in [1usize, 2, 4, 8] {
        let count = read_id(reader, codec)?;
        for _ in 0..count {
            let id = read_id(reader, codec)?;
            let value = IoValue::from_be_slice(reader.bytes(width)?)?;
            io.insert(id, value);
        }
    }

    if codec.is_extended() {
        let count = reader.u16()?;
        for _ in 0..count {
            let id = reader.u16()?;
            let len = reader.u16()? as usize;
            let raw = reader.bytes(len)?;
            // Opaque widths are skipped but not stored.
            match IoValue::from_be_slice(raw) {
                Some(value) => {
                    io.insert(id, value);
                }
                None => trace!(id, len, "Skipping variable-length I/O element"),
            }
        }
    }

    Some((event_io_id, io))
}
