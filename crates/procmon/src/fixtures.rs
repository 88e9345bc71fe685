//! Synthetic proc connector messages for tests.
//!
//! Buffers are assembled by hand, independent of the codec's encode path,
//! so decode tests check the wire layout and not just internal symmetry.

/// Concatenate words as little-endian bytes.
pub(crate) fn le_words(words: &[u32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(words.len() * 4);
    for word in words {
        buf.extend_from_slice(&word.to_le_bytes());
    }
    buf
}

/// A complete inbound message: envelope, event header, payload.
pub(crate) fn event_message(what: u32, timestamp_ns: u64, payload: &[u8]) -> Vec<u8> {
    let msg_len = 16 + 20 + 16 + payload.len();
    let mut buf = Vec::with_capacity(msg_len);

    // nlmsghdr
    buf.extend_from_slice(&(msg_len as u32).to_le_bytes()); // nlmsg_len
    buf.extend_from_slice(&3u16.to_le_bytes()); // nlmsg_type = NLMSG_DONE
    buf.extend_from_slice(&0u16.to_le_bytes()); // nlmsg_flags
    buf.extend_from_slice(&0u32.to_le_bytes()); // nlmsg_seq
    buf.extend_from_slice(&0u32.to_le_bytes()); // nlmsg_pid (kernel)

    // cn_msg
    buf.extend_from_slice(&1u32.to_le_bytes()); // idx = CN_IDX_PROC
    buf.extend_from_slice(&1u32.to_le_bytes()); // val = CN_VAL_PROC
    buf.extend_from_slice(&0u32.to_le_bytes()); // seq
    buf.extend_from_slice(&0u32.to_le_bytes()); // ack
    buf.extend_from_slice(&((16 + payload.len()) as u16).to_le_bytes()); // len
    buf.extend_from_slice(&0u16.to_le_bytes()); // flags

    // proc_event header
    buf.extend_from_slice(&what.to_le_bytes()); // what
    buf.extend_from_slice(&1u32.to_le_bytes()); // cpu
    buf.extend_from_slice(&timestamp_ns.to_le_bytes()); // timestamp

    buf.extend_from_slice(payload);
    buf
}

/// Subscription acknowledgment (what = 0x0).
pub(crate) fn ack_message(seq: u32) -> Vec<u8> {
    event_message(0x0000_0000, 1_000_000, &seq.to_le_bytes())
}

/// Fork event (what = 0x1); tids mirror the pids as in a
/// single-threaded fork.
pub(crate) fn fork_message(parent_pid: u32, child_pid: u32) -> Vec<u8> {
    event_message(
        0x0000_0001,
        0,
        &le_words(&[parent_pid, parent_pid, child_pid, child_pid]),
    )
}

/// Exec event (what = 0x2).
pub(crate) fn exec_message(pid: u32) -> Vec<u8> {
    event_message(0x0000_0002, 0, &le_words(&[pid, pid]))
}

/// Comm change event (what = 0x200); `name` is NUL-padded to 16 bytes.
pub(crate) fn comm_message(tid: u32, pid: u32, name: &[u8]) -> Vec<u8> {
    let mut comm = [0u8; 16];
    comm[..name.len()].copy_from_slice(name);
    let mut payload = le_words(&[tid, pid]);
    payload.extend_from_slice(&comm);
    event_message(0x0000_0200, 0, &payload)
}
