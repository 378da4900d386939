//! Packet encoder, the device side of the protocol
//!
//! Used by the simulator binary and by tests to produce byte-exact frames.

use thiserror::Error;

use super::decoder::{CRC_FIELD_LEN, DATA_FIELD_OVERHEAD, HEADER_LEN};
use crate::crc::crc16;
use crate::types::{AvlRecord, CodecId, DeviceId, IoValue, coordinate_to_raw};

/// Records that cannot be expressed in the requested codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("{0} records do not fit in a one-byte record count")]
    TooManyRecords(usize),

    #[error("I/O id {id} does not fit in Codec 8")]
    IoIdOutOfRange { id: u16 },

    #[error("{count} I/O elements of width {width} exceed the codec's count field")]
    TooManyElements { width: usize, count: usize },

    #[error("identifier of {0} bytes does not fit the length prefix")]
    IdentifierTooLong(usize),
}

/// Login handshake: `[u16 length][ascii identifier]`.
pub fn encode_identifier(device: &DeviceId) -> Result<Vec<u8>, EncodeError> {
    let id = device.as_str().as_bytes();
    let len = u16::try_from(id.len()).map_err(|_| EncodeError::IdentifierTooLong(id.len()))?;
    let mut out = Vec::with_capacity(2 + id.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(id);
    Ok(out)
}

/// Encode `records` as one frame.
pub fn encode_packet(codec: CodecId, records: &[AvlRecord]) -> Result<Vec<u8>, EncodeError> {
    let count = u8::try_from(records.len()).map_err(|_| EncodeError::TooManyRecords(records.len()))?;

    let mut payload = Vec::new();
    for record in records {
        encode_record(codec, record, &mut payload)?;
    }

    Ok(frame(codec.as_u8(), count, &payload))
}

/// Wrap an already-encoded record payload in header, count fields and CRC.
///
/// `codec_id` is written as given, so callers can produce frames the decoder
/// must refuse.
pub fn frame(codec_id: u8, record_count: u8, records_payload: &[u8]) -> Vec<u8> {
    let data_field_length = records_payload.len() as u32 + DATA_FIELD_OVERHEAD;
    let mut out = Vec::with_capacity(HEADER_LEN + data_field_length as usize + CRC_FIELD_LEN);

    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&data_field_length.to_be_bytes());
    out.push(codec_id);
    out.push(record_count);
    out.extend_from_slice(records_payload);
    out.push(record_count);

    let crc = crc16(&out[HEADER_LEN..]);
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

fn encode_record(codec: CodecId, record: &AvlRecord, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    out.extend_from_slice(&record.timestamp_ms.to_be_bytes());
    out.push(record.priority.raw());
    out.extend_from_slice(&coordinate_to_raw(record.longitude).to_be_bytes());
    out.extend_from_slice(&coordinate_to_raw(record.latitude).to_be_bytes());
    out.extend_from_slice(&record.altitude.to_be_bytes());
    out.extend_from_slice(&record.angle.to_be_bytes());
    out.push(record.satellites);
    out.extend_from_slice(&record.speed.to_be_bytes());

    write_id(codec, record.event_io_id, out)?;
    write_count(codec, 0, record.io.len(), out)?;

    for width in [1usize, 2, 4, 8] {
        let elements: Vec<(u16, IoValue)> = record.io.of_width(width).collect();
        write_count(codec, width, elements.len(), out)?;
        for (id, value) in elements {
            write_id(codec, id, out)?;
            value.write_be(out);
        }
    }

    if codec.is_extended() {
        // No variable-length elements: every IoValue has a fixed width.
        out.extend_from_slice(&0u16.to_be_bytes());
    }

    Ok(())
}

fn write_id(codec: CodecId, id: u16, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    if codec.is_extended() {
        out.extend_from_slice(&id.to_be_bytes());
    } else {
        out.push(u8::try_from(id).map_err(|_| EncodeError::IoIdOutOfRange { id })?);
    }
    Ok(())
}

fn write_count(codec: CodecId, width: usize, count: usize, out: &mut Vec<u8>) -> Result<(), EncodeError> {
    let too_many = || EncodeError::TooManyElements { width, count };
    if codec.is_extended() {
        out.extend_from_slice(&u16::try_from(count).map_err(|_| too_many())?.to_be_bytes());
    } else {
        out.push(u8::try_from(count).map_err(|_| too_many())?);
    }
    Ok(())
}
