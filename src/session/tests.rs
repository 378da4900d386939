//! State machine tests
//!
//! These drive [`Session`] with raw byte streams the way a socket would:
//! split arbitrarily, with garbage, with corrupt frames.

use super::*;
use crate::codec::{encode_packet, frame};
use crate::test_utils::{CODEC8E_SAMPLE, TEST_IMEI, handshake, hex, panic_record, periodic_record, test_device};
use crate::types::{AvlRecord, CodecId, Priority};
use proptest::prelude::*;

fn streaming_session(limits: SessionLimits) -> Session {
    let mut session = Session::new(limits);
    let actions = session.feed(&handshake());
    assert_eq!(actions, vec![Action::Authorize(test_device())]);
    let actions = session.resolve_authorization(Verdict::Accepted);
    assert_eq!(actions, vec![Action::Reply(Reply::IdentifierAccepted)]);
    session
}

fn panic_frame() -> Vec<u8> {
    encode_packet(CodecId::Codec8, &[panic_record(1_700_000_000_000)]).unwrap()
}

fn replies(actions: &[Action]) -> Vec<Reply> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::Reply(reply) => Some(*reply),
            _ => None,
        })
        .collect()
}

fn delivered(actions: &[Action]) -> Vec<AvlRecord> {
    actions
        .iter()
        .flat_map(|a| match a {
            Action::Deliver { records, .. } => records.clone(),
            _ => Vec::new(),
        })
        .collect()
}

#[test]
fn handshake_fed_one_byte_at_a_time() {
    let mut session = Session::new(SessionLimits::default());
    let bytes = handshake();
    let mut authorize_requests = 0;

    for (i, byte) in bytes.iter().enumerate() {
        let actions = session.feed(std::slice::from_ref(byte));
        if i + 1 < bytes.len() {
            assert!(actions.is_empty(), "no action expected after byte {}", i);
            assert_eq!(session.phase(), Phase::AwaitingIdentifier);
        }
        authorize_requests += actions.iter().filter(|a| matches!(a, Action::Authorize(_))).count();
    }
    assert_eq!(authorize_requests, 1);
    assert_eq!(session.device().map(DeviceId::as_str), Some(TEST_IMEI));

    let actions = session.resolve_authorization(Verdict::Accepted);
    assert_eq!(replies(&actions), vec![Reply::IdentifierAccepted]);

    // A second answer must not produce another acknowledgement
    assert!(session.resolve_authorization(Verdict::Accepted).is_empty());
}

#[test]
fn zero_identifier_length_is_rejected() {
    let mut session = Session::new(SessionLimits::default());
    let actions = session.feed(&[0x00, 0x00]);
    assert_eq!(
        actions,
        vec![
            Action::Reply(Reply::IdentifierRejected),
            Action::Close(CloseReason::InvalidIdentifierLength(0)),
        ]
    );
    assert!(session.is_closed());
}

#[test]
fn oversized_identifier_length_is_rejected_before_payload() {
    let mut session = Session::new(SessionLimits::default());
    let actions = session.feed(&[0x00, 65]);
    assert_eq!(replies(&actions), vec![Reply::IdentifierRejected]);
    assert_eq!(session.close_reason(), Some(&CloseReason::InvalidIdentifierLength(65)));
}

#[test]
fn non_imei_identifier_depends_on_require_imei() {
    let mut bytes = vec![0x00, 0x04];
    bytes.extend_from_slice(b"ab12");

    let mut strict = Session::new(SessionLimits::default());
    let actions = strict.feed(&bytes);
    assert_eq!(actions.last(), Some(&Action::Close(CloseReason::InvalidIdentifier)));
    assert_eq!(replies(&actions), vec![Reply::IdentifierRejected]);

    let mut lenient = Session::new(SessionLimits { require_imei: false, ..SessionLimits::default() });
    assert_eq!(lenient.feed(&bytes), vec![Action::Authorize(DeviceId::new("ab12"))]);
}

#[test]
fn non_ascii_identifier_is_always_rejected() {
    let mut session = Session::new(SessionLimits { require_imei: false, ..SessionLimits::default() });
    let actions = session.feed(&[0x00, 0x02, 0xC3, 0xA9]);
    assert_eq!(actions.last(), Some(&Action::Close(CloseReason::InvalidIdentifier)));
}

#[test]
fn registry_rejection_sends_zero_and_closes() {
    let mut session = Session::new(SessionLimits::default());
    session.feed(&handshake());
    let actions = session.resolve_authorization(Verdict::Rejected);
    assert_eq!(
        actions,
        vec![Action::Reply(Reply::IdentifierRejected), Action::Close(CloseReason::IdentifierRejected)]
    );
    assert!(session.feed(&panic_frame()).is_empty());
}

#[test]
fn bytes_sent_while_validating_are_replayed_on_acceptance() {
    let mut session = Session::new(SessionLimits::default());
    let mut bytes = handshake();
    bytes.extend_from_slice(&panic_frame());

    assert_eq!(session.feed(&bytes), vec![Action::Authorize(test_device())]);
    assert!(session.feed(&panic_frame()).is_empty());
    assert_eq!(session.phase(), Phase::Validating);

    let actions = session.resolve_authorization(Verdict::Accepted);
    assert_eq!(
        replies(&actions),
        vec![Reply::IdentifierAccepted, Reply::RecordCount(1), Reply::RecordCount(1)]
    );
    assert_eq!(delivered(&actions).len(), 2);
    assert_eq!(session.buffered(), 0);
}

#[test]
fn valid_frame_is_acknowledged_then_delivered() {
    let mut session = streaming_session(SessionLimits::default());
    let actions = session.feed(&panic_frame());

    assert_eq!(actions.len(), 2);
    assert_eq!(actions[0], Action::Reply(Reply::RecordCount(1)));
    match &actions[1] {
        Action::Deliver { device, records } => {
            assert_eq!(device, &test_device());
            assert_eq!(records.len(), 1);
            assert!(records[0].is_panic);
            assert_eq!(records[0].priority, Priority::Panic);
        }
        other => panic!("expected delivery, got {:?}", other),
    }
}

#[test]
fn codec8e_sample_is_delivered() {
    let mut session = streaming_session(SessionLimits::default());
    let actions = session.feed(&hex(CODEC8E_SAMPLE));
    assert_eq!(replies(&actions), vec![Reply::RecordCount(1)]);
    assert_eq!(delivered(&actions)[0].timestamp_ms, 1_560_166_592_000);
}

#[test]
fn garbage_before_frame_is_skipped() {
    let mut session = streaming_session(SessionLimits::default());
    let mut bytes = vec![0xDE, 0xAD, 0xBE];
    bytes.extend_from_slice(&panic_frame());

    let actions = session.feed(&bytes);
    assert_eq!(replies(&actions), vec![Reply::RecordCount(1)]);
    assert_eq!(delivered(&actions).len(), 1);
    assert_eq!(session.stats().resync_bytes, 3);
    assert_eq!(session.phase(), Phase::Streaming);
}

#[test]
fn corrupt_frame_gets_zero_ack_and_session_continues() {
    let mut session = streaming_session(SessionLimits::default());
    let mut corrupt = panic_frame();
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0xFF;

    let actions = session.feed(&corrupt);
    assert_eq!(actions, vec![Action::Reply(Reply::RecordCount(0))]);
    assert_eq!(session.phase(), Phase::Streaming);

    let actions = session.feed(&panic_frame());
    assert_eq!(replies(&actions), vec![Reply::RecordCount(1)]);

    let stats = session.stats();
    assert_eq!(stats.frames_rejected, 1);
    assert_eq!(stats.frames_acked, 1);
    assert_eq!(stats.records_delivered, 1);
}

#[test]
fn unknown_codec_gets_zero_ack() {
    let mut session = streaming_session(SessionLimits::default());
    let actions = session.feed(&frame(0x0C, 0, &[]));
    assert_eq!(actions, vec![Action::Reply(Reply::RecordCount(0))]);
    assert!(!session.is_closed());
}

#[test]
fn empty_valid_frame_acks_zero_without_delivery() {
    let mut session = streaming_session(SessionLimits::default());
    let actions = session.feed(&frame(0x08, 0, &[]));
    assert_eq!(actions, vec![Action::Reply(Reply::RecordCount(0))]);
    assert_eq!(session.stats().frames_acked, 1);
}

#[test]
fn partial_frame_waits_for_remaining_bytes() {
    let mut session = streaming_session(SessionLimits::default());
    let bytes = panic_frame();
    let (head, tail) = bytes.split_at(bytes.len() / 2);

    assert!(session.feed(head).is_empty());
    assert_eq!(session.buffered(), head.len());
    assert_eq!(replies(&session.feed(tail)), vec![Reply::RecordCount(1)]);
}

#[test]
fn oversized_data_field_closes_without_ack() {
    let limits = SessionLimits::default();
    let mut session = streaming_session(limits);
    let declared = limits.max_data_field_len + 1;
    let mut bytes = vec![0, 0, 0, 0];
    bytes.extend_from_slice(&declared.to_be_bytes());

    let actions = session.feed(&bytes);
    assert_eq!(
        actions,
        vec![Action::Close(CloseReason::Protocol(ProtocolViolation::FrameTooLarge {
            length: declared,
            limit: limits.max_data_field_len,
        }))]
    );
}

#[test]
fn buffer_cap_closes_without_ack() {
    let limits = SessionLimits { max_buffer_bytes: 64, ..SessionLimits::default() };
    let mut session = streaming_session(limits);
    let actions = session.feed(&[0u8; 100]);
    assert_eq!(
        actions,
        vec![Action::Close(CloseReason::Protocol(ProtocolViolation::BufferOverflow { size: 100, limit: 64 }))]
    );
    assert_eq!(session.buffered(), 0);
}

#[test]
fn buffer_cap_applies_while_validating() {
    let limits = SessionLimits { max_buffer_bytes: 64, ..SessionLimits::default() };
    let mut session = Session::new(limits);
    session.feed(&handshake());
    let actions = session.feed(&[0xAA; 65]);
    assert!(matches!(actions.as_slice(), [Action::Close(CloseReason::Protocol(_))]));
}

#[test]
fn endless_garbage_desynchronizes() {
    let mut session = streaming_session(SessionLimits::default());
    let actions = session.feed(&[0xFF; 2000]);
    match actions.as_slice() {
        [Action::Close(CloseReason::Protocol(ProtocolViolation::Desynchronized { skipped }))] => {
            assert!(*skipped > 1024)
        }
        other => panic!("expected desync close, got {:?}", other),
    }
}

#[test]
fn garbage_within_resync_window_is_tolerated_across_feeds() {
    let mut session = streaming_session(SessionLimits::default());
    assert!(session.feed(&[0xFF; 600]).is_empty());
    let mut bytes = vec![0xFF; 300];
    bytes.extend_from_slice(&panic_frame());
    assert_eq!(replies(&session.feed(&bytes)), vec![Reply::RecordCount(1)]);
}

#[test]
fn close_is_reported_once() {
    let mut session = streaming_session(SessionLimits::default());
    assert_eq!(session.close(CloseReason::IdleTimeout), vec![Action::Close(CloseReason::IdleTimeout)]);
    assert!(session.close(CloseReason::PeerClosed).is_empty());
    assert_eq!(session.close_reason(), Some(&CloseReason::IdleTimeout));
    assert!(session.feed(&panic_frame()).is_empty());
}

#[test]
fn records_keep_wire_order_across_frames() {
    let mut session = streaming_session(SessionLimits::default());
    let first = encode_packet(CodecId::Codec8, &[periodic_record(1), periodic_record(2)]).unwrap();
    let second = encode_packet(CodecId::Codec8Extended, &[panic_record(3)]).unwrap();
    let mut bytes = first;
    bytes.extend_from_slice(&second);

    let actions = session.feed(&bytes);
    assert_eq!(replies(&actions), vec![Reply::RecordCount(2), Reply::RecordCount(1)]);
    let timestamps: Vec<u64> = delivered(&actions).iter().map(|r| r.timestamp_ms).collect();
    assert_eq!(timestamps, vec![1, 2, 3]);
}

/// Feed `chunks` in order, accepting the device as soon as it is identified.
fn run_stream<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<Action> {
    fn drive(session: &mut Session, actions: Vec<Action>, out: &mut Vec<Action>) {
        for action in actions {
            match action {
                Action::Authorize(_) => {
                    let more = session.resolve_authorization(Verdict::Accepted);
                    drive(session, more, out);
                }
                other => out.push(other),
            }
        }
    }

    let mut session = Session::new(SessionLimits::default());
    let mut out = Vec::new();
    for chunk in chunks {
        let actions = session.feed(chunk);
        drive(&mut session, actions, &mut out);
    }
    out
}

fn mixed_stream() -> Vec<u8> {
    let mut corrupt = encode_packet(CodecId::Codec8, &[periodic_record(10)]).unwrap();
    corrupt[20] ^= 0x01;

    let mut bytes = handshake();
    bytes.extend_from_slice(&encode_packet(CodecId::Codec8, &[periodic_record(1), panic_record(2)]).unwrap());
    bytes.extend_from_slice(&[0x12, 0x34]);
    bytes.extend_from_slice(&corrupt);
    bytes.extend_from_slice(&hex(CODEC8E_SAMPLE));
    bytes
}

proptest! {
    #[test]
    fn fragmentation_does_not_change_outcome(sizes in prop::collection::vec(1usize..48, 1..64)) {
        let stream = mixed_stream();
        let expected = run_stream([stream.as_slice()]);

        let mut chunks = Vec::new();
        let mut offset = 0;
        let mut i = 0;
        while offset < stream.len() {
            let end = (offset + sizes[i % sizes.len()]).min(stream.len());
            chunks.push(&stream[offset..end]);
            offset = end;
            i += 1;
        }

        prop_assert_eq!(run_stream(chunks), expected);
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut session = streaming_session(SessionLimits::default());
        let _ = session.feed(&bytes);
        prop_assert!(session.buffered() <= SessionLimits::default().max_buffer_bytes);
    }
}
