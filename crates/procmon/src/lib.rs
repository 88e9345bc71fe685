//! Async process event monitoring for Linux.
//!
//! This crate subscribes to the kernel's proc connector (the process
//! event subsystem of `NETLINK_CONNECTOR`) and delivers typed lifecycle
//! events: fork, exec, uid/gid changes, session changes, ptrace
//! attach/detach, command-name changes, core dumps, and exits. A
//! background task owns the socket and fans events out to one bounded
//! queue per event kind, plus an error queue for receive and decode
//! failures.
//!
//! Subscribing requires `CAP_NET_ADMIN`.
//!
//! # Example
//!
//! ```ignore
//! use procmon::ProcListener;
//!
//! #[tokio::main]
//! async fn main() -> procmon::Result<()> {
//!     let (mut listener, mut queues) = ProcListener::open().await?;
//!     listener.start()?;
//!
//!     loop {
//!         tokio::select! {
//!             Some(fork) = queues.forks.recv() => println!("{fork}"),
//!             Some(exit) = queues.exits.recv() => println!("{exit}"),
//!             Some(err) = queues.errors.recv() => eprintln!("error: {err}"),
//!             _ = tokio::signal::ctrl_c() => break,
//!         }
//!     }
//!
//!     listener.stop().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod event;
pub mod listener;
pub mod socket;

#[cfg(test)]
mod fixtures;

pub use error::{DecodeError, Error, Result, TransportError};
pub use event::{
    Ack, CommChange, CoreDump, EventKind, Exec, Exit, Fork, GidChange, ProcEvent, Ptrace,
    SidChange, UidChange,
};
pub use listener::{EventQueues, ProcListener, QUEUE_DEPTH};
pub use socket::ProcSocket;
