//! Background receive loop and per-kind event delivery.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::codec::{MessageIter, decode_event};
use crate::error::{DecodeError, Error, Result};
use crate::event::{
    Ack, CommChange, CoreDump, Exec, Exit, Fork, GidChange, ProcEvent, Ptrace, SidChange,
    UidChange,
};
use crate::socket::ProcSocket;

/// Capacity of each delivery queue.
///
/// A full queue blocks the receive loop rather than dropping events, so
/// a stalled consumer applies backpressure all the way to the kernel
/// buffer.
pub const QUEUE_DEPTH: usize = 256;

/// The consumer half of a listener: one bounded queue per event kind
/// plus an error queue.
///
/// The receive loop is the sole writer. Within one queue, events arrive
/// in the order the kernel sent them; there is no ordering across queues.
/// Dropping a receiver discards that kind's future events without
/// stalling the loop. After [`ProcListener::stop`] the queues remain
/// drainable of everything already published.
pub struct EventQueues {
    /// Subscription acknowledgments.
    pub acks: mpsc::Receiver<Ack>,
    /// Fork events.
    pub forks: mpsc::Receiver<Fork>,
    /// Exec events.
    pub execs: mpsc::Receiver<Exec>,
    /// UID change events.
    pub uid_changes: mpsc::Receiver<UidChange>,
    /// GID change events.
    pub gid_changes: mpsc::Receiver<GidChange>,
    /// Session change events.
    pub sid_changes: mpsc::Receiver<SidChange>,
    /// Ptrace attach/detach events.
    pub ptraces: mpsc::Receiver<Ptrace>,
    /// Command name change events.
    pub comm_changes: mpsc::Receiver<CommChange>,
    /// Core dump events.
    pub coredumps: mpsc::Receiver<CoreDump>,
    /// Exit events.
    pub exits: mpsc::Receiver<Exit>,
    /// Receive and decode failures, one entry per occurrence.
    pub errors: mpsc::Receiver<Error>,
}

/// The dispatcher's half of the delivery queues.
struct EventSenders {
    acks: mpsc::Sender<Ack>,
    forks: mpsc::Sender<Fork>,
    execs: mpsc::Sender<Exec>,
    uid_changes: mpsc::Sender<UidChange>,
    gid_changes: mpsc::Sender<GidChange>,
    sid_changes: mpsc::Sender<SidChange>,
    ptraces: mpsc::Sender<Ptrace>,
    comm_changes: mpsc::Sender<CommChange>,
    coredumps: mpsc::Sender<CoreDump>,
    exits: mpsc::Sender<Exit>,
    errors: mpsc::Sender<Error>,
}

fn channel_set() -> (EventSenders, EventQueues) {
    let (acks_tx, acks) = mpsc::channel(QUEUE_DEPTH);
    let (forks_tx, forks) = mpsc::channel(QUEUE_DEPTH);
    let (execs_tx, execs) = mpsc::channel(QUEUE_DEPTH);
    let (uid_changes_tx, uid_changes) = mpsc::channel(QUEUE_DEPTH);
    let (gid_changes_tx, gid_changes) = mpsc::channel(QUEUE_DEPTH);
    let (sid_changes_tx, sid_changes) = mpsc::channel(QUEUE_DEPTH);
    let (ptraces_tx, ptraces) = mpsc::channel(QUEUE_DEPTH);
    let (comm_changes_tx, comm_changes) = mpsc::channel(QUEUE_DEPTH);
    let (coredumps_tx, coredumps) = mpsc::channel(QUEUE_DEPTH);
    let (exits_tx, exits) = mpsc::channel(QUEUE_DEPTH);
    let (errors_tx, errors) = mpsc::channel(QUEUE_DEPTH);

    (
        EventSenders {
            acks: acks_tx,
            forks: forks_tx,
            execs: execs_tx,
            uid_changes: uid_changes_tx,
            gid_changes: gid_changes_tx,
            sid_changes: sid_changes_tx,
            ptraces: ptraces_tx,
            comm_changes: comm_changes_tx,
            coredumps: coredumps_tx,
            exits: exits_tx,
            errors: errors_tx,
        },
        EventQueues {
            acks,
            forks,
            execs,
            uid_changes,
            gid_changes,
            sid_changes,
            ptraces,
            comm_changes,
            coredumps,
            exits,
            errors,
        },
    )
}

impl EventSenders {
    /// Split a datagram and dispatch each complete message in order.
    async fn dispatch_datagram(&self, datagram: &[u8]) {
        for message in MessageIter::new(datagram) {
            match message {
                Ok(frame) => self.dispatch_message(frame).await,
                Err(err) => {
                    warn!(%err, "malformed message framing");
                    self.report(err.into()).await;
                }
            }
        }
    }

    /// Decode one message and route it to its queue.
    async fn dispatch_message(&self, frame: &[u8]) {
        match decode_event(frame) {
            Ok((event, timestamp_ns)) => {
                trace!(%event, timestamp_ns, "event");
                self.publish(event).await;
            }
            // expected when the kernel grows event kinds this crate
            // does not model; there is no queue to publish to
            Err(DecodeError::UnrecognizedKind(raw)) => {
                debug!("dropping unrecognized event kind {raw:#010x}");
            }
            Err(err) => {
                warn!(%err, "cannot decode event");
                self.report(err.into()).await;
            }
        }
    }

    /// Route an event to its kind's queue.
    ///
    /// A send fails only when the consumer dropped that receiver; such
    /// events are discarded without blocking.
    async fn publish(&self, event: ProcEvent) {
        match event {
            ProcEvent::Ack(e) => {
                let _ = self.acks.send(e).await;
            }
            ProcEvent::Fork(e) => {
                let _ = self.forks.send(e).await;
            }
            ProcEvent::Exec(e) => {
                let _ = self.execs.send(e).await;
            }
            ProcEvent::UidChange(e) => {
                let _ = self.uid_changes.send(e).await;
            }
            ProcEvent::GidChange(e) => {
                let _ = self.gid_changes.send(e).await;
            }
            ProcEvent::SidChange(e) => {
                let _ = self.sid_changes.send(e).await;
            }
            ProcEvent::Ptrace(e) => {
                let _ = self.ptraces.send(e).await;
            }
            ProcEvent::CommChange(e) => {
                let _ = self.comm_changes.send(e).await;
            }
            ProcEvent::CoreDump(e) => {
                let _ = self.coredumps.send(e).await;
            }
            ProcEvent::Exit(e) => {
                let _ = self.exits.send(e).await;
            }
        }
    }

    async fn report(&self, err: Error) {
        let _ = self.errors.send(err).await;
    }
}

enum State {
    /// Subscribed, loop not yet running.
    Open {
        socket: ProcSocket,
        senders: EventSenders,
        stop_rx: watch::Receiver<bool>,
    },
    /// Receive loop running.
    Listening { task: JoinHandle<()> },
    /// Stopped, terminal.
    Stopped,
}

/// A subscribed process event listener.
///
/// [`open`] binds the endpoint, subscribes, and hands back the delivery
/// queues; [`start`] spawns the receive loop; [`stop`] shuts it down and
/// releases the endpoint. Dropping a running listener stops the loop as
/// well.
///
/// # Example
///
/// ```ignore
/// use procmon::ProcListener;
///
/// // Requires CAP_NET_ADMIN
/// let (mut listener, mut queues) = ProcListener::open().await?;
/// listener.start()?;
///
/// while let Some(fork) = queues.forks.recv().await {
///     println!("fork: {} -> {}", fork.parent_pid, fork.child_pid);
/// }
///
/// listener.stop().await;
/// ```
///
/// [`open`]: ProcListener::open
/// [`start`]: ProcListener::start
/// [`stop`]: ProcListener::stop
pub struct ProcListener {
    stop: watch::Sender<bool>,
    state: State,
}

impl ProcListener {
    /// Open the endpoint, subscribe to process events, and allocate the
    /// delivery queues.
    ///
    /// If the subscription handshake fails the endpoint is released
    /// before the error returns; no half-open subscription is left
    /// behind. The kernel acknowledges the subscription with an
    /// [`Ack`] event once the loop is started.
    pub async fn open() -> Result<(Self, EventQueues)> {
        let mut socket = ProcSocket::open()?;
        if let Err(err) = socket.subscribe().await {
            socket.close().await;
            return Err(err.into());
        }

        let (senders, queues) = channel_set();
        let (stop, stop_rx) = watch::channel(false);

        Ok((
            Self {
                stop,
                state: State::Open {
                    socket,
                    senders,
                    stop_rx,
                },
            },
            queues,
        ))
    }

    /// Spawn the background receive loop.
    ///
    /// Exactly one loop runs per listener: a second call fails with
    /// [`Error::AlreadyListening`], a call after [`stop`] with
    /// [`Error::Stopped`].
    ///
    /// [`stop`]: ProcListener::stop
    pub fn start(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Stopped) {
            State::Open {
                socket,
                senders,
                stop_rx,
            } => {
                let task = tokio::spawn(run_loop(socket, senders, stop_rx));
                self.state = State::Listening { task };
                Ok(())
            }
            listening @ State::Listening { .. } => {
                self.state = listening;
                Err(Error::AlreadyListening)
            }
            State::Stopped => Err(Error::Stopped),
        }
    }

    /// Stop the receive loop and release the endpoint.
    ///
    /// The loop observes the stop signal at its next iteration boundary,
    /// closes the socket, and exits; this call waits for that. Stopping
    /// an already-stopped listener is a no-op, as is stopping one that
    /// was never started (the endpoint is still released).
    pub async fn stop(&mut self) {
        match std::mem::replace(&mut self.state, State::Stopped) {
            State::Open { mut socket, .. } => {
                socket.close().await;
            }
            State::Listening { task } => {
                let _ = self.stop.send(true);
                if task.await.is_err() {
                    warn!("receive loop task failed");
                }
            }
            State::Stopped => {}
        }
    }

    /// Whether the receive loop is currently running.
    pub fn is_listening(&self) -> bool {
        matches!(self.state, State::Listening { .. })
    }
}

/// The receive loop: wait for a datagram or the stop signal, dispatch,
/// repeat. Transport errors are reported and the loop keeps going; only
/// the stop signal (or the listener being dropped) ends it.
async fn run_loop(mut socket: ProcSocket, senders: EventSenders, mut stop: watch::Receiver<bool>) {
    debug!("receive loop started");
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            result = socket.recv() => match result {
                Ok(datagram) => senders.dispatch_datagram(&datagram).await,
                Err(err) => {
                    warn!(%err, "receive failed");
                    senders.report(err.into()).await;
                }
            },
        }
    }
    socket.close().await;
    debug!("receive loop stopped");
}
