//! Per-connection protocol state machine
//!
//! [`Session`] owns the byte buffer of one device connection and turns raw
//! bytes into [`Action`]s. It performs no I/O and never awaits: the
//! authorization lookup is requested with [`Action::Authorize`] and answered
//! through [`Session::resolve_authorization`]. This keeps every framing rule
//! testable without sockets.
//!
//! ```text
//! AwaitingIdentifier ──identifier──▶ Validating ──accepted──▶ Streaming
//!         │                              │                        │
//!         └──────────────────────────────┴────────────────────────┴──▶ Closed
//! ```
//!
//! ## Usage Example
//!
//! ```rust
//! use avl_gateway::auth::Verdict;
//! use avl_gateway::session::{Action, Phase, Reply, Session, SessionLimits};
//!
//! let mut session = Session::new(SessionLimits::default());
//! let mut handshake = vec![0x00, 0x0F];
//! handshake.extend_from_slice(b"356307042441013");
//!
//! let actions = session.feed(&handshake);
//! assert!(matches!(actions[0], Action::Authorize(_)));
//! assert_eq!(session.phase(), Phase::Validating);
//!
//! let actions = session.resolve_authorization(Verdict::Accepted);
//! assert_eq!(actions, vec![Action::Reply(Reply::IdentifierAccepted)]);
//! assert_eq!(session.phase(), Phase::Streaming);
//! ```

mod action;

#[cfg(test)]
mod tests;

pub use action::{Action, CloseReason, Reply, SessionStats};

use std::fmt;
use tracing::{debug, info, trace, warn};

use crate::auth::Verdict;
use crate::codec::{self, DecodeError, HEADER_LEN};
use crate::error::ProtocolViolation;
use crate::types::{AvlPacket, DeviceId};

const PREAMBLE: [u8; 4] = [0; 4];

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    AwaitingIdentifier,
    Validating,
    Streaming,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::AwaitingIdentifier => "awaiting_identifier",
            Phase::Validating => "validating",
            Phase::Streaming => "streaming",
            Phase::Closed => "closed",
        })
    }
}

/// Hard caps protecting the gateway from misbehaving devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub max_identifier_len: usize,
    pub max_buffer_bytes: usize,
    pub max_data_field_len: u32,
    pub max_resync_bytes: usize,
    /// Reject identifiers that are not fifteen ASCII digits
    pub require_imei: bool,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_identifier_len: 64,
            max_buffer_bytes: 1024 * 1024,
            max_data_field_len: 512 * 1024,
            max_resync_bytes: 1024,
            require_imei: true,
        }
    }
}

/// Protocol state for one device connection.
#[derive(Debug)]
pub struct Session {
    phase: Phase,
    limits: SessionLimits,
    buffer: Vec<u8>,
    device: Option<DeviceId>,
    /// Bytes skipped looking for a preamble since the last frame
    resync_skipped: usize,
    close_reason: Option<CloseReason>,
    stats: SessionStats,
}

impl Session {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            phase: Phase::AwaitingIdentifier,
            limits,
            buffer: Vec::new(),
            device: None,
            resync_skipped: 0,
            close_reason: None,
            stats: SessionStats::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Identifier received in the handshake, once extracted.
    pub fn device(&self) -> Option<&DeviceId> {
        self.device.as_ref()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Append bytes from the socket and process as much as possible.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.is_closed() {
            return actions;
        }

        self.stats.bytes_received += bytes.len() as u64;
        trace!(bytes = bytes.len(), hex = %HexPrefix(bytes), "Data received");

        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() > self.limits.max_buffer_bytes {
            let violation =
                ProtocolViolation::BufferOverflow { size: self.buffer.len(), limit: self.limits.max_buffer_bytes };
            self.close_into(&mut actions, CloseReason::Protocol(violation));
            return actions;
        }

        match self.phase {
            Phase::AwaitingIdentifier => self.read_identifier(&mut actions),
            Phase::Streaming => self.read_frames(&mut actions),
            // Held until the registry answers
            Phase::Validating | Phase::Closed => {}
        }
        actions
    }

    /// Apply the registry's answer for the pending identifier.
    ///
    /// On acceptance any bytes buffered while validating are processed
    /// immediately. Ignored outside [`Phase::Validating`].
    pub fn resolve_authorization(&mut self, verdict: Verdict) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.phase != Phase::Validating {
            return actions;
        }

        match verdict {
            Verdict::Accepted => {
                info!(device = ?self.device.as_ref().map(DeviceId::as_str), "Handshake accepted");
                self.phase = Phase::Streaming;
                actions.push(Action::Reply(Reply::IdentifierAccepted));
                self.read_frames(&mut actions);
            }
            Verdict::Rejected => {
                actions.push(Action::Reply(Reply::IdentifierRejected));
                self.close_into(&mut actions, CloseReason::IdentifierRejected);
            }
        }
        actions
    }

    /// Terminate the session from outside (timeouts, peer close, shutdown).
    ///
    /// Returns the `Close` action, or nothing when already closed.
    pub fn close(&mut self, reason: CloseReason) -> Vec<Action> {
        let mut actions = Vec::new();
        self.close_into(&mut actions, reason);
        actions
    }

    fn close_into(&mut self, actions: &mut Vec<Action>, reason: CloseReason) {
        if self.is_closed() {
            return;
        }
        if reason.is_protocol_fault() {
            warn!(reason = %reason, buffered = self.buffer.len(), "Closing session");
        } else {
            debug!(reason = %reason, "Closing session");
        }
        self.phase = Phase::Closed;
        self.buffer = Vec::new();
        self.close_reason = Some(reason.clone());
        actions.push(Action::Close(reason));
    }

    fn read_identifier(&mut self, actions: &mut Vec<Action>) {
        if self.buffer.len() < 2 {
            return;
        }
        let declared = u16::from_be_bytes([self.buffer[0], self.buffer[1]]);
        let len = declared as usize;
        if len == 0 || len > self.limits.max_identifier_len {
            warn!(length = declared, limit = self.limits.max_identifier_len, "Invalid identifier length");
            actions.push(Action::Reply(Reply::IdentifierRejected));
            self.close_into(actions, CloseReason::InvalidIdentifierLength(declared));
            return;
        }
        if self.buffer.len() < 2 + len {
            return;
        }

        let device = DeviceId::from_wire(&self.buffer[2..2 + len]);
        self.buffer.drain(..2 + len);

        match device {
            Some(device) if !self.limits.require_imei || device.is_imei() => {
                info!(device = %device, "Identifier received");
                self.device = Some(device.clone());
                self.phase = Phase::Validating;
                actions.push(Action::Authorize(device));
            }
            other => {
                warn!(identifier = ?other.as_ref().map(DeviceId::as_str), "Identifier format rejected");
                actions.push(Action::Reply(Reply::IdentifierRejected));
                self.close_into(actions, CloseReason::InvalidIdentifier);
            }
        }
    }

    fn read_frames(&mut self, actions: &mut Vec<Action>) {
        while self.phase == Phase::Streaming {
            match self.resync() {
                Ok(true) => {}
                Ok(false) => return,
                Err(violation) => {
                    self.close_into(actions, CloseReason::Protocol(violation));
                    return;
                }
            }
            if self.buffer.len() < HEADER_LEN {
                return;
            }

            let data_field_length =
                u32::from_be_bytes([self.buffer[4], self.buffer[5], self.buffer[6], self.buffer[7]]);
            if data_field_length > self.limits.max_data_field_len {
                let violation =
                    ProtocolViolation::FrameTooLarge { length: data_field_length, limit: self.limits.max_data_field_len };
                self.close_into(actions, CloseReason::Protocol(violation));
                return;
            }

            let frame_len = codec::frame_len(data_field_length);
            if self.buffer.len() < frame_len {
                return;
            }

            let decoded = codec::decode_frame(&self.buffer[..frame_len]);
            self.buffer.drain(..frame_len);
            self.resync_skipped = 0;
            self.finish_frame(decoded, actions);
        }
    }

    /// Drop leading bytes until the buffer starts with a zero preamble.
    ///
    /// Returns `Ok(false)` when no preamble is buffered yet. Up to three
    /// trailing bytes are kept since they may begin a preamble.
    fn resync(&mut self) -> Result<bool, ProtocolViolation> {
        let found = self.buffer.windows(PREAMBLE.len()).position(|w| w == PREAMBLE);
        let skip = match found {
            Some(offset) => offset,
            None => self.buffer.len().saturating_sub(PREAMBLE.len() - 1),
        };

        if skip > 0 {
            self.buffer.drain(..skip);
            self.resync_skipped += skip;
            self.stats.resync_bytes += skip as u64;
            if self.resync_skipped > self.limits.max_resync_bytes {
                return Err(ProtocolViolation::Desynchronized { skipped: self.resync_skipped });
            }
            if found.is_some() {
                debug!(skipped = skip, "Resynchronized on preamble");
            }
        }
        Ok(found.is_some())
    }

    fn finish_frame(&mut self, decoded: Result<AvlPacket, DecodeError>, actions: &mut Vec<Action>) {
        let packet = match decoded {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "Undecodable frame");
                self.stats.frames_rejected += 1;
                actions.push(Action::Reply(Reply::RecordCount(0)));
                return;
            }
        };

        if !packet.valid {
            warn!(codec = %packet.codec, declared = packet.record_count, "Frame failed validation");
            self.stats.frames_rejected += 1;
            actions.push(Action::Reply(Reply::RecordCount(0)));
            return;
        }

        let count = packet.ack_count();
        self.stats.frames_acked += 1;
        actions.push(Action::Reply(Reply::RecordCount(count)));
        if packet.records.is_empty() {
            return;
        }

        info!(records = count, codec = %packet.codec, "Frame decoded");
        // Streaming is only reachable with an identifier
        if let Some(device) = &self.device {
            self.stats.records_delivered += u64::from(count);
            actions.push(Action::Deliver { device: device.clone(), records: packet.records });
        }
    }
}

/// Hex dump of at most the first 32 bytes.
struct HexPrefix<'a>(&'a [u8]);

impl fmt::Display for HexPrefix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().take(32) {
            write!(f, "{:02x}", byte)?;
        }
        if self.0.len() > 32 {
            f.write_str("..")?;
        }
        Ok(())
    }
}
