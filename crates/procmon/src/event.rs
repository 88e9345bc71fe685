//! Process lifecycle event types.
//!
//! Pure data: the closed set of events the kernel reports, their
//! discriminant values, and their textual renderings. Decoding lives in
//! [`crate::codec`].

use std::fmt;

// Process event discriminants (bitmask, exactly one bit per kind)
pub(crate) const PROC_EVENT_NONE: u32 = 0x00000000;
pub(crate) const PROC_EVENT_FORK: u32 = 0x00000001;
pub(crate) const PROC_EVENT_EXEC: u32 = 0x00000002;
pub(crate) const PROC_EVENT_UID: u32 = 0x00000004;
pub(crate) const PROC_EVENT_GID: u32 = 0x00000040;
pub(crate) const PROC_EVENT_SID: u32 = 0x00000080;
pub(crate) const PROC_EVENT_PTRACE: u32 = 0x00000100;
pub(crate) const PROC_EVENT_COMM: u32 = 0x00000200;
pub(crate) const PROC_EVENT_COREDUMP: u32 = 0x40000000;
pub(crate) const PROC_EVENT_EXIT: u32 = 0x80000000;

/// The event-kind discriminant carried in every event header.
///
/// The kernel may emit kinds this crate does not model; those decode to
/// [`EventKind::Unrecognized`] with the raw discriminant preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Subscription acknowledgment.
    Ack,
    /// Process forked.
    Fork,
    /// Process executed a new program.
    Exec,
    /// Process changed UID.
    UidChange,
    /// Process changed GID.
    GidChange,
    /// Process started a new session.
    SidChange,
    /// Process is being traced.
    Ptrace,
    /// Process changed its command name.
    CommChange,
    /// Process dumped core.
    CoreDump,
    /// Process exited.
    Exit,
    /// A discriminant this crate does not model.
    Unrecognized(u32),
}

impl EventKind {
    /// Map a raw discriminant to its kind.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            PROC_EVENT_NONE => Self::Ack,
            PROC_EVENT_FORK => Self::Fork,
            PROC_EVENT_EXEC => Self::Exec,
            PROC_EVENT_UID => Self::UidChange,
            PROC_EVENT_GID => Self::GidChange,
            PROC_EVENT_SID => Self::SidChange,
            PROC_EVENT_PTRACE => Self::Ptrace,
            PROC_EVENT_COMM => Self::CommChange,
            PROC_EVENT_COREDUMP => Self::CoreDump,
            PROC_EVENT_EXIT => Self::Exit,
            other => Self::Unrecognized(other),
        }
    }

    /// The raw discriminant value for this kind.
    pub fn raw(self) -> u32 {
        match self {
            Self::Ack => PROC_EVENT_NONE,
            Self::Fork => PROC_EVENT_FORK,
            Self::Exec => PROC_EVENT_EXEC,
            Self::UidChange => PROC_EVENT_UID,
            Self::GidChange => PROC_EVENT_GID,
            Self::SidChange => PROC_EVENT_SID,
            Self::Ptrace => PROC_EVENT_PTRACE,
            Self::CommChange => PROC_EVENT_COMM,
            Self::CoreDump => PROC_EVENT_COREDUMP,
            Self::Exit => PROC_EVENT_EXIT,
            Self::Unrecognized(raw) => raw,
        }
    }

    /// Short lowercase name, suitable for log fields and CLI filters.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Fork => "fork",
            Self::Exec => "exec",
            Self::UidChange => "uid",
            Self::GidChange => "gid",
            Self::SidChange => "sid",
            Self::Ptrace => "ptrace",
            Self::CommChange => "comm",
            Self::CoreDump => "coredump",
            Self::Exit => "exit",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

/// Acknowledgment of a subscribe or unsubscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Acknowledgment sequence number.
    pub seq: u32,
}

/// Process forked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fork {
    /// Parent thread ID.
    pub parent_tid: u32,
    /// Parent process ID.
    pub parent_pid: u32,
    /// Child process ID.
    pub child_pid: u32,
    /// Child thread ID.
    pub child_tid: u32,
}

/// Process executed a new program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exec {
    /// Thread ID.
    pub tid: u32,
    /// Process ID.
    pub pid: u32,
}

/// Process changed UID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UidChange {
    /// Thread ID.
    pub tid: u32,
    /// Process ID.
    pub pid: u32,
    /// Real UID after the change.
    pub ruid: u32,
    /// Effective UID after the change.
    pub euid: u32,
}

/// Process changed GID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GidChange {
    /// Thread ID.
    pub tid: u32,
    /// Process ID.
    pub pid: u32,
    /// Real GID after the change.
    pub rgid: u32,
    /// Effective GID after the change.
    pub egid: u32,
}

/// Process started a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SidChange {
    /// Thread ID.
    pub tid: u32,
    /// Process ID.
    pub pid: u32,
}

/// Process is being traced (ptrace attach or detach).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ptrace {
    /// Traced thread ID.
    pub target_tid: u32,
    /// Traced process ID.
    pub target_pid: u32,
    /// Tracer thread ID.
    pub tracer_tid: u32,
    /// Tracer process ID.
    pub tracer_pid: u32,
}

/// Process changed its comm (command name).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommChange {
    /// Thread ID.
    pub tid: u32,
    /// Process ID.
    pub pid: u32,
    /// New command name, NUL-padded to 16 bytes.
    pub comm: [u8; 16],
}

impl CommChange {
    /// The command name up to the first NUL byte.
    pub fn name(&self) -> String {
        let end = self.comm.iter().position(|&b| b == 0).unwrap_or(self.comm.len());
        String::from_utf8_lossy(&self.comm[..end]).into_owned()
    }
}

/// Process dumped core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreDump {
    /// Thread ID.
    pub tid: u32,
    /// Process ID.
    pub pid: u32,
}

/// Process exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exit {
    /// Thread ID.
    pub tid: u32,
    /// Process ID.
    pub pid: u32,
    /// Exit code.
    pub code: u32,
    /// Exit signal.
    pub signal: u32,
}

/// A decoded process lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcEvent {
    /// Subscription acknowledgment.
    Ack(Ack),
    /// Process forked.
    Fork(Fork),
    /// Process executed a new program.
    Exec(Exec),
    /// Process changed UID.
    UidChange(UidChange),
    /// Process changed GID.
    GidChange(GidChange),
    /// Process started a new session.
    SidChange(SidChange),
    /// Process is being traced.
    Ptrace(Ptrace),
    /// Process changed its command name.
    CommChange(CommChange),
    /// Process dumped core.
    CoreDump(CoreDump),
    /// Process exited.
    Exit(Exit),
}

impl ProcEvent {
    /// The kind discriminant of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Ack(_) => EventKind::Ack,
            Self::Fork(_) => EventKind::Fork,
            Self::Exec(_) => EventKind::Exec,
            Self::UidChange(_) => EventKind::UidChange,
            Self::GidChange(_) => EventKind::GidChange,
            Self::SidChange(_) => EventKind::SidChange,
            Self::Ptrace(_) => EventKind::Ptrace,
            Self::CommChange(_) => EventKind::CommChange,
            Self::CoreDump(_) => EventKind::CoreDump,
            Self::Exit(_) => EventKind::Exit,
        }
    }

    /// Get the process ID this event is about, if applicable.
    ///
    /// For forks this is the child.
    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::Ack(_) => None,
            Self::Fork(e) => Some(e.child_pid),
            Self::Exec(e) => Some(e.pid),
            Self::UidChange(e) => Some(e.pid),
            Self::GidChange(e) => Some(e.pid),
            Self::SidChange(e) => Some(e.pid),
            Self::Ptrace(e) => Some(e.target_pid),
            Self::CommChange(e) => Some(e.pid),
            Self::CoreDump(e) => Some(e.pid),
            Self::Exit(e) => Some(e.pid),
        }
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ack(seq={})", self.seq)
    }
}

impl fmt::Display for Fork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fork(ppid={} ptid={} cpid={} ctid={})",
            self.parent_pid, self.parent_tid, self.child_pid, self.child_tid
        )
    }
}

impl fmt::Display for Exec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Exec(pid={} tid={})", self.pid, self.tid)
    }
}

impl fmt::Display for UidChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UidChange(pid={} tid={} ruid={} euid={})",
            self.pid, self.tid, self.ruid, self.euid
        )
    }
}

impl fmt::Display for GidChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GidChange(pid={} tid={} rgid={} egid={})",
            self.pid, self.tid, self.rgid, self.egid
        )
    }
}

impl fmt::Display for SidChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SidChange(pid={} tid={})", self.pid, self.tid)
    }
}

impl fmt::Display for Ptrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ptrace(pid={} tid={} tpid={} ttid={})",
            self.target_pid, self.target_tid, self.tracer_pid, self.tracer_tid
        )
    }
}

impl fmt::Display for CommChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommChange(pid={} tid={} comm={:?})", self.pid, self.tid, self.name())
    }
}

impl fmt::Display for CoreDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoreDump(pid={} tid={})", self.pid, self.tid)
    }
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Exit(pid={} tid={} code={} signal={})",
            self.pid, self.tid, self.code, self.signal
        )
    }
}

impl fmt::Display for ProcEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ack(e) => e.fmt(f),
            Self::Fork(e) => e.fmt(f),
            Self::Exec(e) => e.fmt(f),
            Self::UidChange(e) => e.fmt(f),
            Self::GidChange(e) => e.fmt(f),
            Self::SidChange(e) => e.fmt(f),
            Self::Ptrace(e) => e.fmt(f),
            Self::CommChange(e) => e.fmt(f),
            Self::CoreDump(e) => e.fmt(f),
            Self::Exit(e) => e.fmt(f),
        }
    }
}
