//! Teltonika AVL wire codec (Codec 8 and Codec 8 Extended)
//!
//! - [`decode`] / [`decode_frame`]: validate and decode one complete frame
//! - [`encode_packet`] / [`encode_identifier`]: the device side, for simulation and tests
//! - [`ByteReader`]: bounds-checked big-endian cursor shared by the decoder

mod decoder;
mod encoder;
mod reader;

pub use decoder::{
    CRC_FIELD_LEN, DATA_FIELD_OVERHEAD, DecodeError, HEADER_LEN, RECORDS_OFFSET, decode, decode_frame,
    frame_len,
};
pub use encoder::{EncodeError, encode_identifier, encode_packet, frame};
pub use reader::ByteReader;
