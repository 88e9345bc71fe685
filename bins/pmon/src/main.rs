//! pmon - watch kernel process lifecycle events.
//!
//! Subscribes to the proc connector and prints every selected event as a
//! text line or a JSON object, one per line, until interrupted.

use clap::{Parser, ValueEnum};
use procmon::{EventKind, ProcEvent, ProcListener};
use serde_json::json;
use tokio::signal::unix::{SignalKind, signal};

/// Event kinds that can be monitored.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum Kind {
    /// Subscription acknowledgments.
    Ack,
    /// Process forks.
    Fork,
    /// Program executions.
    Exec,
    /// UID changes.
    Uid,
    /// GID changes.
    Gid,
    /// New sessions.
    Sid,
    /// Ptrace attach/detach.
    Ptrace,
    /// Command name changes.
    Comm,
    /// Core dumps.
    Coredump,
    /// Process exits.
    Exit,
    /// All event kinds.
    All,
}

impl Kind {
    fn matches(self, kind: EventKind) -> bool {
        match self {
            Kind::All => true,
            Kind::Ack => kind == EventKind::Ack,
            Kind::Fork => kind == EventKind::Fork,
            Kind::Exec => kind == EventKind::Exec,
            Kind::Uid => kind == EventKind::UidChange,
            Kind::Gid => kind == EventKind::GidChange,
            Kind::Sid => kind == EventKind::SidChange,
            Kind::Ptrace => kind == EventKind::Ptrace,
            Kind::Comm => kind == EventKind::CommChange,
            Kind::Coredump => kind == EventKind::CoreDump,
            Kind::Exit => kind == EventKind::Exit,
        }
    }
}

#[derive(Parser)]
#[command(name = "pmon", version, about = "Process event monitor")]
struct Cli {
    /// Event kinds to show.
    #[arg(default_value = "all")]
    kinds: Vec<Kind>,

    /// Output JSON, one object per line.
    #[arg(short = 'j', long)]
    json: bool,
}

fn selected(kinds: &[Kind], kind: EventKind) -> bool {
    kinds.iter().any(|k| k.matches(kind))
}

/// One JSON object per event, with the comm field already trimmed.
fn render_json(event: &ProcEvent) -> serde_json::Value {
    match event {
        ProcEvent::Ack(e) => json!({"event": "ack", "seq": e.seq}),
        ProcEvent::Fork(e) => json!({
            "event": "fork",
            "ppid": e.parent_pid,
            "ptid": e.parent_tid,
            "cpid": e.child_pid,
            "ctid": e.child_tid,
        }),
        ProcEvent::Exec(e) => json!({"event": "exec", "pid": e.pid, "tid": e.tid}),
        ProcEvent::UidChange(e) => json!({
            "event": "uid",
            "pid": e.pid,
            "tid": e.tid,
            "ruid": e.ruid,
            "euid": e.euid,
        }),
        ProcEvent::GidChange(e) => json!({
            "event": "gid",
            "pid": e.pid,
            "tid": e.tid,
            "rgid": e.rgid,
            "egid": e.egid,
        }),
        ProcEvent::SidChange(e) => json!({"event": "sid", "pid": e.pid, "tid": e.tid}),
        ProcEvent::Ptrace(e) => json!({
            "event": "ptrace",
            "pid": e.target_pid,
            "tid": e.target_tid,
            "tracer_pid": e.tracer_pid,
            "tracer_tid": e.tracer_tid,
        }),
        ProcEvent::CommChange(e) => json!({
            "event": "comm",
            "pid": e.pid,
            "tid": e.tid,
            "comm": e.name(),
        }),
        ProcEvent::CoreDump(e) => json!({"event": "coredump", "pid": e.pid, "tid": e.tid}),
        ProcEvent::Exit(e) => json!({
            "event": "exit",
            "pid": e.pid,
            "tid": e.tid,
            "code": e.code,
            "signal": e.signal,
        }),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let (mut listener, mut queues) = ProcListener::open().await?;
    listener.start()?;

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    if !cli.json {
        println!("Monitoring process events (Ctrl+C to stop)...");
    }

    loop {
        let event = tokio::select! {
            _ = sigint.recv() => break,
            _ = sigterm.recv() => break,
            _ = sigquit.recv() => break,
            Some(err) = queues.errors.recv() => {
                eprintln!("receive error: {err}");
                continue;
            }
            Some(e) = queues.acks.recv() => ProcEvent::Ack(e),
            Some(e) = queues.forks.recv() => ProcEvent::Fork(e),
            Some(e) = queues.execs.recv() => ProcEvent::Exec(e),
            Some(e) = queues.uid_changes.recv() => ProcEvent::UidChange(e),
            Some(e) = queues.gid_changes.recv() => ProcEvent::GidChange(e),
            Some(e) = queues.sid_changes.recv() => ProcEvent::SidChange(e),
            Some(e) = queues.ptraces.recv() => ProcEvent::Ptrace(e),
            Some(e) = queues.comm_changes.recv() => ProcEvent::CommChange(e),
            Some(e) = queues.coredumps.recv() => ProcEvent::CoreDump(e),
            Some(e) = queues.exits.recv() => ProcEvent::Exit(e),
        };

        if selected(&cli.kinds, event.kind()) {
            if cli.json {
                println!("{}", render_json(&event));
            } else {
                println!("{event}");
            }
        }
    }

    listener.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    if unsafe { libc::geteuid() } != 0 {
        eprintln!("Monitoring not started. Root privileges are required!");
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_matches_every_kind() {
        for kind in [
            EventKind::Ack,
            EventKind::Fork,
            EventKind::Exec,
            EventKind::UidChange,
            EventKind::GidChange,
            EventKind::SidChange,
            EventKind::Ptrace,
            EventKind::CommChange,
            EventKind::CoreDump,
            EventKind::Exit,
        ] {
            assert!(selected(&[Kind::All], kind));
        }
    }

    #[test]
    fn filter_selects_named_kinds_only() {
        let kinds = [Kind::Fork, Kind::Exit];
        assert!(selected(&kinds, EventKind::Fork));
        assert!(selected(&kinds, EventKind::Exit));
        assert!(!selected(&kinds, EventKind::Exec));
        assert!(!selected(&kinds, EventKind::Ack));
    }

    #[test]
    fn json_rendering_trims_comm() {
        let mut comm = [0u8; 16];
        comm[..6].copy_from_slice(b"worker");
        let event = ProcEvent::CommChange(procmon::CommChange { tid: 7, pid: 7, comm });
        let value = render_json(&event);
        assert_eq!(value["event"], "comm");
        assert_eq!(value["comm"], "worker");
    }

    #[test]
    fn json_rendering_fork_fields() {
        let event = ProcEvent::Fork(procmon::Fork {
            parent_tid: 99,
            parent_pid: 100,
            child_pid: 200,
            child_tid: 201,
        });
        let value = render_json(&event);
        assert_eq!(value["event"], "fork");
        assert_eq!(value["ppid"], 100);
        assert_eq!(value["cpid"], 200);
    }
}
