//! Wire format for proc connector messages.
//!
//! Layout of every inbound notification, all fields little-endian:
//!
//! ```text
//! nlmsghdr (16) | cn_msg (20) | event header (16) | event payload (4..24)
//! ```
//!
//! [`encode_subscribe`] builds the control message that turns event
//! delivery on or off; [`decode_event`] turns one complete message into a
//! typed [`ProcEvent`]; [`MessageIter`] splits a datagram that carries
//! several messages back to back.

use winnow::binary::{le_u32, le_u64};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::DecodeError;
use crate::event::{
    Ack, CommChange, CoreDump, EventKind, Exec, Exit, Fork, GidChange, ProcEvent, Ptrace,
    SidChange, UidChange,
};

/// Result type for winnow parsers.
pub(crate) type PResult<T> = core::result::Result<T, ErrMode<ContextError>>;

/// Connector class of the process event subsystem.
pub const CN_IDX_PROC: u32 = 1;
/// Connector kind of the process event subsystem.
pub const CN_VAL_PROC: u32 = 1;

// Control messages travel as NLMSG_DONE
const NLMSG_DONE: u16 = 3;

// Subscribe control payload values
const OP_SUBSCRIBE: u32 = 1;
const OP_UNSUBSCRIBE: u32 = 0;
const OP_LEN: usize = 4;

/// Netlink message header alignment.
pub const NLMSG_ALIGNTO: usize = 4;

/// Align a length to NLMSG_ALIGNTO boundary.
#[inline]
pub const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

/// Size of the netlink message header.
///
/// `NlMsgHdr` derives `IntoBytes`, which only compiles for padding-free
/// layouts, so the type's size is the wire size.
pub const NLMSG_HDRLEN: usize = nlmsg_align(std::mem::size_of::<NlMsgHdr>());

/// Size of the connector sub-header.
pub const CN_MSG_LEN: usize = std::mem::size_of::<CnMsg>();

/// Size of the event header (what + cpu + timestamp).
pub const EVENT_HDR_LEN: usize = 16;

/// Envelope bytes preceding every event payload.
pub const ENVELOPE_LEN: usize = NLMSG_HDRLEN + CN_MSG_LEN + EVENT_HDR_LEN;

const SUBSCRIBE_MSG_LEN: usize = NLMSG_HDRLEN + CN_MSG_LEN + OP_LEN;

/// Netlink message header (mirrors struct nlmsghdr), little-endian fields.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct NlMsgHdr {
    /// Length of message including header.
    pub nlmsg_len: U32,
    /// Message type.
    pub nlmsg_type: U16,
    /// Additional flags.
    pub nlmsg_flags: U16,
    /// Sequence number.
    pub nlmsg_seq: U32,
    /// Sending process port ID.
    pub nlmsg_pid: U32,
}

impl NlMsgHdr {
    /// Convert header to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse header from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<&Self, DecodeError> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| DecodeError::Truncated {
                expected: NLMSG_HDRLEN,
                actual: data.len(),
            })
    }
}

/// Connector sub-header (mirrors struct cn_msg), little-endian fields.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct CnMsg {
    /// Connector class (CN_IDX_PROC).
    pub idx: U32,
    /// Connector kind (CN_VAL_PROC).
    pub val: U32,
    /// Sequence number.
    pub seq: U32,
    /// Acknowledgment sequence.
    pub ack: U32,
    /// Payload length.
    pub len: U16,
    /// Flags.
    pub flags: U16,
}

impl CnMsg {
    /// Convert header to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse header from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<&Self, DecodeError> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| DecodeError::Truncated {
                expected: CN_MSG_LEN,
                actual: data.len(),
            })
    }
}

/// proc_event header (what + cpu + timestamp).
#[derive(Debug, Clone, Copy)]
struct EventHeader {
    what: u32,
    #[allow(dead_code)]
    cpu: u32,
    timestamp_ns: u64,
}

impl EventHeader {
    fn parse(input: &mut &[u8]) -> PResult<Self> {
        let what = le_u32.parse_next(input)?;
        let cpu = le_u32.parse_next(input)?;
        let timestamp_ns = le_u64.parse_next(input)?;
        Ok(Self {
            what,
            cpu,
            timestamp_ns,
        })
    }
}

/// Build the control message that enables (`true`) or disables (`false`)
/// process event delivery for this socket.
///
/// The payload is a single little-endian u32: 1 subscribes, 0 unsubscribes.
/// Length fields are computed from the encoded field sizes.
pub fn encode_subscribe(active: bool) -> Vec<u8> {
    let op: u32 = if active { OP_SUBSCRIBE } else { OP_UNSUBSCRIBE };
    let mut buf = Vec::with_capacity(SUBSCRIBE_MSG_LEN);

    let hdr = NlMsgHdr {
        nlmsg_len: U32::new(SUBSCRIBE_MSG_LEN as u32),
        nlmsg_type: U16::new(NLMSG_DONE),
        nlmsg_flags: U16::new(0),
        nlmsg_seq: U32::new(0),
        nlmsg_pid: U32::new(std::process::id()),
    };
    buf.extend_from_slice(hdr.as_bytes());

    let cn = CnMsg {
        idx: U32::new(CN_IDX_PROC),
        val: U32::new(CN_VAL_PROC),
        seq: U32::new(0),
        ack: U32::new(0),
        len: U16::new(OP_LEN as u16),
        flags: U16::new(0),
    };
    buf.extend_from_slice(cn.as_bytes());

    buf.extend_from_slice(&op.to_le_bytes());
    buf
}

/// Decode one complete message into a typed event plus the kernel
/// timestamp (nanoseconds).
///
/// `data` must hold a single message starting at its netlink header; use
/// [`MessageIter`] to split a datagram first. Declared lengths are checked
/// against the bytes actually present before anything is read. A
/// discriminant outside the modeled set is
/// [`DecodeError::UnrecognizedKind`]; payload bytes beyond the variant's
/// shape are ignored, since newer kernels append fields.
pub fn decode_event(data: &[u8]) -> Result<(ProcEvent, u64), DecodeError> {
    let hdr = NlMsgHdr::from_bytes(data)?;
    let msg_len = hdr.nlmsg_len.get() as usize;
    if msg_len < ENVELOPE_LEN {
        return Err(DecodeError::Truncated {
            expected: ENVELOPE_LEN,
            actual: msg_len,
        });
    }
    if msg_len > data.len() {
        return Err(DecodeError::Truncated {
            expected: msg_len,
            actual: data.len(),
        });
    }

    let body = &data[NLMSG_HDRLEN..msg_len];
    let _cn = CnMsg::from_bytes(body)?;
    let mut input = &body[CN_MSG_LEN..];

    let header = EventHeader::parse(&mut input).map_err(|_| DecodeError::Truncated {
        expected: ENVELOPE_LEN,
        actual: data.len(),
    })?;

    let kind = EventKind::from_raw(header.what);
    if let EventKind::Unrecognized(raw) = kind {
        return Err(DecodeError::UnrecognizedKind(raw));
    }

    let event = parse_payload(kind, &mut input).map_err(|_| DecodeError::Truncated {
        expected: ENVELOPE_LEN + payload_len(kind),
        actual: msg_len,
    })?;

    Ok((event, header.timestamp_ns))
}

/// Parse the payload shape belonging to a recognized kind.
fn parse_payload(kind: EventKind, input: &mut &[u8]) -> PResult<ProcEvent> {
    match kind {
        EventKind::Ack => {
            let seq = le_u32.parse_next(input)?;
            Ok(ProcEvent::Ack(Ack { seq }))
        }

        EventKind::Fork => {
            let parent_tid = le_u32.parse_next(input)?;
            let parent_pid = le_u32.parse_next(input)?;
            let child_pid = le_u32.parse_next(input)?;
            let child_tid = le_u32.parse_next(input)?;
            Ok(ProcEvent::Fork(Fork {
                parent_tid,
                parent_pid,
                child_pid,
                child_tid,
            }))
        }

        EventKind::Exec => {
            let tid = le_u32.parse_next(input)?;
            let pid = le_u32.parse_next(input)?;
            Ok(ProcEvent::Exec(Exec { tid, pid }))
        }

        EventKind::UidChange => {
            let tid = le_u32.parse_next(input)?;
            let pid = le_u32.parse_next(input)?;
            let ruid = le_u32.parse_next(input)?;
            let euid = le_u32.parse_next(input)?;
            Ok(ProcEvent::UidChange(UidChange {
                tid,
                pid,
                ruid,
                euid,
            }))
        }

        EventKind::GidChange => {
            let tid = le_u32.parse_next(input)?;
            let pid = le_u32.parse_next(input)?;
            let rgid = le_u32.parse_next(input)?;
            let egid = le_u32.parse_next(input)?;
            Ok(ProcEvent::GidChange(GidChange {
                tid,
                pid,
                rgid,
                egid,
            }))
        }

        EventKind::SidChange => {
            let tid = le_u32.parse_next(input)?;
            let pid = le_u32.parse_next(input)?;
            Ok(ProcEvent::SidChange(SidChange { tid, pid }))
        }

        EventKind::Ptrace => {
            let target_tid = le_u32.parse_next(input)?;
            let target_pid = le_u32.parse_next(input)?;
            let tracer_tid = le_u32.parse_next(input)?;
            let tracer_pid = le_u32.parse_next(input)?;
            Ok(ProcEvent::Ptrace(Ptrace {
                target_tid,
                target_pid,
                tracer_tid,
                tracer_pid,
            }))
        }

        EventKind::CommChange => {
            let tid = le_u32.parse_next(input)?;
            let pid = le_u32.parse_next(input)?;
            let name: &[u8] = take(16usize).parse_next(input)?;
            let mut comm = [0u8; 16];
            comm.copy_from_slice(name);
            Ok(ProcEvent::CommChange(CommChange { tid, pid, comm }))
        }

        EventKind::CoreDump => {
            let tid = le_u32.parse_next(input)?;
            let pid = le_u32.parse_next(input)?;
            Ok(ProcEvent::CoreDump(CoreDump { tid, pid }))
        }

        EventKind::Exit => {
            let tid = le_u32.parse_next(input)?;
            let pid = le_u32.parse_next(input)?;
            let code = le_u32.parse_next(input)?;
            let signal = le_u32.parse_next(input)?;
            Ok(ProcEvent::Exit(Exit {
                tid,
                pid,
                code,
                signal,
            }))
        }

        // rejected by the caller before payload parsing
        EventKind::Unrecognized(_) => Err(ErrMode::Cut(ContextError::new())),
    }
}

/// Payload bytes required by a recognized kind.
fn payload_len(kind: EventKind) -> usize {
    match kind {
        EventKind::Ack => 4,
        EventKind::Exec | EventKind::SidChange | EventKind::CoreDump => 8,
        EventKind::Fork
        | EventKind::UidChange
        | EventKind::GidChange
        | EventKind::Ptrace
        | EventKind::Exit => 16,
        EventKind::CommChange => 24,
        EventKind::Unrecognized(_) => 0,
    }
}

/// Iterator over netlink messages in a datagram.
///
/// Yields each complete message (header included) in order. A message
/// whose declared length is impossible yields one `Err` and ends the
/// iteration, since the following message boundary cannot be trusted.
pub struct MessageIter<'a> {
    data: &'a [u8],
}

impl<'a> MessageIter<'a> {
    /// Create a new message iterator.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<&'a [u8], DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < NLMSG_HDRLEN {
            return None;
        }

        let header = match NlMsgHdr::from_bytes(self.data) {
            Ok(h) => h,
            Err(e) => return Some(Err(e)),
        };

        let msg_len = header.nlmsg_len.get() as usize;
        if msg_len < NLMSG_HDRLEN {
            self.data = &[];
            return Some(Err(DecodeError::Truncated {
                expected: NLMSG_HDRLEN,
                actual: msg_len,
            }));
        }
        if msg_len > self.data.len() {
            let actual = self.data.len();
            self.data = &[];
            return Some(Err(DecodeError::Truncated {
                expected: msg_len,
                actual,
            }));
        }

        let message = &self.data[..msg_len];
        let aligned_len = nlmsg_align(msg_len);

        // Move to next message
        if aligned_len >= self.data.len() {
            self.data = &[];
        } else {
            self.data = &self.data[aligned_len..];
        }

        Some(Ok(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn subscribe_message_layout() {
        let buf = encode_subscribe(true);
        assert_eq!(buf.len(), 40);

        // nlmsghdr
        assert_eq!(&buf[0..4], &40u32.to_le_bytes()); // nlmsg_len
        assert_eq!(&buf[4..6], &3u16.to_le_bytes()); // nlmsg_type = NLMSG_DONE
        assert_eq!(&buf[6..8], &0u16.to_le_bytes()); // nlmsg_flags
        assert_eq!(&buf[8..12], &0u32.to_le_bytes()); // nlmsg_seq
        assert_eq!(&buf[12..16], &std::process::id().to_le_bytes()); // nlmsg_pid

        // cn_msg
        assert_eq!(&buf[16..20], &1u32.to_le_bytes()); // idx
        assert_eq!(&buf[20..24], &1u32.to_le_bytes()); // val
        assert_eq!(&buf[24..28], &0u32.to_le_bytes()); // seq
        assert_eq!(&buf[28..32], &0u32.to_le_bytes()); // ack
        assert_eq!(&buf[32..34], &4u16.to_le_bytes()); // len
        assert_eq!(&buf[34..36], &0u16.to_le_bytes()); // flags

        // payload
        assert_eq!(&buf[36..40], &1u32.to_le_bytes());
    }

    #[test]
    fn unsubscribe_payload_is_zero() {
        let buf = encode_subscribe(false);
        assert_eq!(buf.len(), 40);
        assert_eq!(&buf[36..40], &0u32.to_le_bytes());
        // header fields identical to the subscribe message
        assert_eq!(&buf[..36], &encode_subscribe(true)[..36]);
    }

    #[test]
    fn decode_ack() {
        let msg = fixtures::ack_message(7);
        let (event, _) = decode_event(&msg).unwrap();
        assert_eq!(event, ProcEvent::Ack(Ack { seq: 7 }));
    }

    #[test]
    fn decode_fork() {
        let payload = fixtures::le_words(&[99, 100, 200, 201]);
        let msg = fixtures::event_message(crate::event::PROC_EVENT_FORK, 77, &payload);
        let (event, timestamp_ns) = decode_event(&msg).unwrap();
        assert_eq!(
            event,
            ProcEvent::Fork(Fork {
                parent_tid: 99,
                parent_pid: 100,
                child_pid: 200,
                child_tid: 201,
            })
        );
        assert_eq!(timestamp_ns, 77);
    }

    #[test]
    fn decode_comm() {
        let msg = fixtures::comm_message(42, 42, b"worker");
        let (event, _) = decode_event(&msg).unwrap();
        match event {
            ProcEvent::CommChange(comm) => {
                assert_eq!(comm.tid, 42);
                assert_eq!(comm.pid, 42);
                assert_eq!(comm.name(), "worker");
            }
            other => panic!("expected CommChange, got {other:?}"),
        }
    }

    #[test]
    fn decode_exit() {
        let payload = fixtures::le_words(&[11, 11, 1, 9]);
        let msg = fixtures::event_message(crate::event::PROC_EVENT_EXIT, 0, &payload);
        let (event, _) = decode_event(&msg).unwrap();
        assert_eq!(
            event,
            ProcEvent::Exit(Exit {
                tid: 11,
                pid: 11,
                code: 1,
                signal: 9,
            })
        );
    }

    #[test]
    fn decode_remaining_kinds() {
        let cases = [
            (
                crate::event::PROC_EVENT_EXEC,
                fixtures::le_words(&[5, 5]),
                ProcEvent::Exec(Exec { tid: 5, pid: 5 }),
            ),
            (
                crate::event::PROC_EVENT_UID,
                fixtures::le_words(&[5, 5, 1000, 0]),
                ProcEvent::UidChange(UidChange {
                    tid: 5,
                    pid: 5,
                    ruid: 1000,
                    euid: 0,
                }),
            ),
            (
                crate::event::PROC_EVENT_GID,
                fixtures::le_words(&[5, 5, 100, 0]),
                ProcEvent::GidChange(GidChange {
                    tid: 5,
                    pid: 5,
                    rgid: 100,
                    egid: 0,
                }),
            ),
            (
                crate::event::PROC_EVENT_SID,
                fixtures::le_words(&[8, 8]),
                ProcEvent::SidChange(SidChange { tid: 8, pid: 8 }),
            ),
            (
                crate::event::PROC_EVENT_PTRACE,
                fixtures::le_words(&[10, 10, 20, 20]),
                ProcEvent::Ptrace(Ptrace {
                    target_tid: 10,
                    target_pid: 10,
                    tracer_tid: 20,
                    tracer_pid: 20,
                }),
            ),
            (
                crate::event::PROC_EVENT_COREDUMP,
                fixtures::le_words(&[9, 9]),
                ProcEvent::CoreDump(CoreDump { tid: 9, pid: 9 }),
            ),
        ];
        for (what, payload, expected) in cases {
            let msg = fixtures::event_message(what, 0, &payload);
            let (event, _) = decode_event(&msg).unwrap();
            assert_eq!(event, expected);
        }
    }

    #[test]
    fn short_buffers_are_truncated_not_panics() {
        let payload = fixtures::le_words(&[99, 100, 200, 201]);
        let msg = fixtures::event_message(crate::event::PROC_EVENT_FORK, 0, &payload);
        for len in 0..ENVELOPE_LEN {
            match decode_event(&msg[..len]) {
                Err(DecodeError::Truncated { .. }) => {}
                other => panic!("prefix of {len} bytes: expected Truncated, got {other:?}"),
            }
        }
    }

    #[test]
    fn truncated_payload() {
        // declared length admits only half the fork payload
        let payload = fixtures::le_words(&[99, 100]);
        let msg = fixtures::event_message(crate::event::PROC_EVENT_FORK, 0, &payload);
        match decode_event(&msg) {
            Err(DecodeError::Truncated { expected, actual }) => {
                assert_eq!(expected, ENVELOPE_LEN + 16);
                assert_eq!(actual, ENVELOPE_LEN + 8);
            }
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn declared_length_beyond_buffer() {
        let payload = fixtures::le_words(&[99, 100, 200, 201]);
        let msg = fixtures::event_message(crate::event::PROC_EVENT_FORK, 0, &payload);
        match decode_event(&msg[..msg.len() - 4]) {
            Err(DecodeError::Truncated { expected, actual }) => {
                assert_eq!(expected, msg.len());
                assert_eq!(actual, msg.len() - 4);
            }
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_discriminant() {
        let msg = fixtures::event_message(0x0000_0400, 0, &fixtures::le_words(&[1, 2]));
        match decode_event(&msg) {
            Err(DecodeError::UnrecognizedKind(raw)) => assert_eq!(raw, 0x400),
            other => panic!("expected UnrecognizedKind, got {other:?}"),
        }
    }

    #[test]
    fn trailing_payload_bytes_are_ignored() {
        // four extra bytes after the exit payload, as a newer kernel would send
        let mut payload = fixtures::le_words(&[11, 11, 0, 17]);
        payload.extend_from_slice(&0xdead_beefu32.to_le_bytes());
        let msg = fixtures::event_message(crate::event::PROC_EVENT_EXIT, 0, &payload);
        let (event, _) = decode_event(&msg).unwrap();
        assert_eq!(
            event,
            ProcEvent::Exit(Exit {
                tid: 11,
                pid: 11,
                code: 0,
                signal: 17,
            })
        );
    }

    #[test]
    fn message_iter_splits_datagram() {
        let first = fixtures::ack_message(1);
        let second = fixtures::event_message(
            crate::event::PROC_EVENT_EXEC,
            0,
            &fixtures::le_words(&[5, 5]),
        );
        let mut datagram = first.clone();
        datagram.extend_from_slice(&second);

        let messages: Vec<_> = MessageIter::new(&datagram).collect();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].as_ref().unwrap(), &&first[..]);
        assert_eq!(messages[1].as_ref().unwrap(), &&second[..]);
    }

    #[test]
    fn message_iter_aligns_between_messages() {
        // first message declares 54 bytes; the second starts at the next
        // 4-byte boundary (56)
        let mut datagram = fixtures::ack_message(1);
        datagram[0..4].copy_from_slice(&54u32.to_le_bytes());
        datagram.truncate(54);
        datagram.extend_from_slice(&[0, 0]); // pad to 56
        let second = fixtures::ack_message(2);
        datagram.extend_from_slice(&second);

        let messages: Vec<_> = MessageIter::new(&datagram).collect();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].as_ref().unwrap().len(), 54);
        assert_eq!(messages[1].as_ref().unwrap(), &&second[..]);
    }

    #[test]
    fn message_iter_stops_after_impossible_length() {
        let mut datagram = fixtures::ack_message(1);
        datagram[0..4].copy_from_slice(&7u32.to_le_bytes()); // shorter than a header
        let mut iter = MessageIter::new(&datagram);
        assert!(matches!(
            iter.next(),
            Some(Err(DecodeError::Truncated { expected: NLMSG_HDRLEN, actual: 7 }))
        ));
        assert!(iter.next().is_none());

        let mut datagram = fixtures::ack_message(1);
        datagram[0..4].copy_from_slice(&1000u32.to_le_bytes()); // longer than the datagram
        let mut iter = MessageIter::new(&datagram);
        assert!(matches!(iter.next(), Some(Err(DecodeError::Truncated { .. }))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn message_iter_ignores_short_tail() {
        let mut datagram = fixtures::ack_message(1);
        datagram.extend_from_slice(&[1, 2, 3]); // 3 stray bytes, less than a header
        let messages: Vec<_> = MessageIter::new(&datagram).collect();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_ok());

        assert!(MessageIter::new(&[]).next().is_none());
    }

    #[test]
    fn envelope_sizes() {
        assert_eq!(NLMSG_HDRLEN, 16);
        assert_eq!(CN_MSG_LEN, 20);
        assert_eq!(ENVELOPE_LEN, 52);
    }
}
