//! Outputs of the session state machine

use std::fmt;

use crate::error::ProtocolViolation;
use crate::types::{AvlRecord, DeviceId};

/// Bytes the server writes back to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Single byte `0x01`
    IdentifierAccepted,
    /// Single byte `0x00`
    IdentifierRejected,
    /// Four byte big-endian count of accepted records
    RecordCount(u32),
}

impl Reply {
    pub fn to_bytes(self) -> Vec<u8> {
        match self {
            Reply::IdentifierAccepted => vec![0x01],
            Reply::IdentifierRejected => vec![0x00],
            Reply::RecordCount(count) => count.to_be_bytes().to_vec(),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The registry rejected the device
    IdentifierRejected,
    /// Declared identifier length was zero or above the cap
    InvalidIdentifierLength(u16),
    /// Identifier bytes were not an acceptable device id
    InvalidIdentifier,
    Protocol(ProtocolViolation),
    LoginTimeout,
    IdleTimeout,
    PeerClosed,
    Transport(String),
    Shutdown,
}

impl CloseReason {
    /// True when the device caused the close by misbehaving on the wire.
    pub fn is_protocol_fault(&self) -> bool {
        matches!(
            self,
            CloseReason::InvalidIdentifierLength(_) | CloseReason::InvalidIdentifier | CloseReason::Protocol(_)
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::IdentifierRejected => f.write_str("identifier rejected"),
            CloseReason::InvalidIdentifierLength(len) => write!(f, "invalid identifier length {}", len),
            CloseReason::InvalidIdentifier => f.write_str("invalid identifier"),
            CloseReason::Protocol(violation) => write!(f, "protocol violation: {}", violation),
            CloseReason::LoginTimeout => f.write_str("login timeout"),
            CloseReason::IdleTimeout => f.write_str("idle timeout"),
            CloseReason::PeerClosed => f.write_str("peer closed"),
            CloseReason::Transport(e) => write!(f, "transport error: {}", e),
            CloseReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// What the driver must do after feeding the session.
///
/// Actions are emitted in the order they have to be carried out. A `Reply`
/// that precedes a `Close` must be written before the socket is shut.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Reply(Reply),
    /// Ask the registry about this device, then call
    /// [`Session::resolve_authorization`](super::Session::resolve_authorization)
    Authorize(DeviceId),
    /// Records of one acknowledged frame, in wire order
    Deliver { device: DeviceId, records: Vec<AvlRecord> },
    Close(CloseReason),
}

/// Per-session counters, logged when the connection ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub bytes_received: u64,
    pub frames_acked: u64,
    pub frames_rejected: u64,
    pub records_delivered: u64,
    pub resync_bytes: u64,
}
