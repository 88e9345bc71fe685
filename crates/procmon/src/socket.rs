//! Async transport for the proc connector endpoint.

use std::io;

use bytes::BytesMut;
use netlink_sys::{Socket, SocketAddr, protocols};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use crate::codec::{self, CN_IDX_PROC, NLMSG_HDRLEN};
use crate::error::TransportError;

// Proc connector datagrams are one or a few messages of 56-76 bytes;
// one page is plenty.
const RECV_BUF_LEN: usize = 4096;

/// The subscription endpoint: an async netlink connector socket bound to
/// the process event group.
///
/// Exactly one endpoint per listener. All operations after a [`close`]
/// fail; `close` itself is idempotent.
///
/// [`close`]: ProcSocket::close
pub struct ProcSocket {
    /// The underlying async file descriptor, `None` once closed.
    fd: Option<AsyncFd<Socket>>,
    /// Local address the socket is bound to.
    addr: SocketAddr,
    /// Whether event delivery is currently enabled.
    subscribed: bool,
}

impl ProcSocket {
    /// Open a netlink connector endpoint bound to the process event
    /// multicast group.
    ///
    /// The local port id is the caller's effective gid; running as root
    /// that is zero and the kernel assigns a port. Binding to the group
    /// requires `CAP_NET_ADMIN`.
    pub fn open() -> Result<Self, TransportError> {
        let mut socket =
            Socket::new(protocols::NETLINK_CONNECTOR).map_err(TransportError::Unavailable)?;
        socket
            .set_non_blocking(true)
            .map_err(TransportError::Unavailable)?;

        let egid = unsafe { libc::getegid() };
        let addr = SocketAddr::new(egid, CN_IDX_PROC);
        socket.bind(&addr).map_err(TransportError::BindFailed)?;

        let fd = AsyncFd::new(socket).map_err(TransportError::Unavailable)?;

        Ok(Self {
            fd: Some(fd),
            addr,
            subscribed: false,
        })
    }

    /// Ask the kernel to start delivering process events.
    pub async fn subscribe(&mut self) -> Result<(), TransportError> {
        self.send(&codec::encode_subscribe(true)).await?;
        self.subscribed = true;
        Ok(())
    }

    /// Ask the kernel to stop delivering process events.
    pub async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        self.send(&codec::encode_subscribe(false)).await?;
        self.subscribed = false;
        Ok(())
    }

    /// Receive one datagram, allocating a buffer.
    ///
    /// A datagram shorter than the netlink header is a
    /// [`TransportError::ShortRead`]. All receive failures leave the
    /// socket usable; callers may keep receiving.
    pub async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let fd = self.fd()?;
        // Allocate buffer with capacity - don't resize, let recv fill it
        let mut buf = BytesMut::with_capacity(RECV_BUF_LEN);

        loop {
            let mut guard = fd.ready(Interest::READABLE).await?;

            match guard.try_io(|inner| inner.get_ref().recv(&mut buf, 0)) {
                Ok(result) => {
                    let n = result?;
                    if n < NLMSG_HDRLEN {
                        return Err(TransportError::ShortRead {
                            expected: NLMSG_HDRLEN,
                            actual: n,
                        });
                    }
                    return Ok(buf.to_vec());
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Release the endpoint, unsubscribing first if subscribed.
    ///
    /// The unsubscribe is best effort; the kernel drops the subscription
    /// with the socket either way. Closing an already-closed socket is a
    /// no-op.
    pub async fn close(&mut self) {
        if self.fd.is_none() {
            return;
        }
        if self.subscribed {
            self.subscribed = false;
            let _ = self.send(&codec::encode_subscribe(false)).await;
        }
        self.fd = None;
    }

    /// Whether the endpoint is open.
    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    /// Whether event delivery is currently enabled.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// The bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send a message.
    async fn send(&self, msg: &[u8]) -> Result<(), TransportError> {
        let fd = self.fd()?;
        loop {
            let mut guard = fd.ready(Interest::WRITABLE).await?;

            match guard.try_io(|inner| inner.get_ref().send(msg, 0)) {
                Ok(result) => {
                    result?;
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }

    fn fd(&self) -> Result<&AsyncFd<Socket>, TransportError> {
        self.fd.as_ref().ok_or_else(|| {
            TransportError::Os(io::Error::new(io::ErrorKind::NotConnected, "socket closed"))
        })
    }
}
