//! Error types for process event monitoring.

use std::io;

/// Result type for listener operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The notification endpoint could not be created.
    ///
    /// The protocol is unsupported on this kernel or the endpoint could not
    /// be registered with the async runtime.
    #[error("notification endpoint unavailable: {0}")]
    Unavailable(#[source] io::Error),

    /// The endpoint exists but could not be bound to the process event
    /// group. Binding requires `CAP_NET_ADMIN`.
    #[error("cannot bind to process event group: {0}")]
    BindFailed(#[source] io::Error),

    /// A datagram arrived shorter than the transport header.
    #[error("short read: expected at least {expected} bytes, got {actual}")]
    ShortRead {
        /// Minimum length of a well-formed datagram.
        expected: usize,
        /// Bytes actually received.
        actual: usize,
    },

    /// Any other socket-level failure.
    #[error("socket error: {0}")]
    Os(#[from] io::Error),
}

impl TransportError {
    /// Check if this is a permission error (EPERM, EACCES).
    ///
    /// Opening the process event group requires root or `CAP_NET_ADMIN`;
    /// callers usually turn this into a "run as root" hint.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Unavailable(err) | Self::BindFailed(err) | Self::Os(err) => {
                matches!(err.raw_os_error(), Some(1) | Some(13)) // EPERM=1, EACCES=13
            }
            Self::ShortRead { .. } => false,
        }
    }
}

/// Errors produced while decoding a received message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Message was truncated.
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected message length.
        expected: usize,
        /// Actual bytes available.
        actual: usize,
    },

    /// The event discriminant is not one this crate knows how to decode.
    #[error("unrecognized event kind {0:#010x}")]
    UnrecognizedKind(u32),
}

/// Errors that can occur during process event monitoring.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Decode failure for a single received message.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// `start` was called while the receive loop is already running.
    #[error("receive loop already running")]
    AlreadyListening,

    /// `start` was called after the listener was stopped.
    #[error("listener already stopped")]
    Stopped,
}

impl Error {
    /// Check if this error came from a permission failure (EPERM, EACCES).
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_permission_denied(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied() {
        let err = TransportError::BindFailed(io::Error::from_raw_os_error(1)); // EPERM
        assert!(err.is_permission_denied());
        let err: Error = err.into();
        assert!(err.is_permission_denied());

        let err = TransportError::Os(io::Error::from_raw_os_error(11)); // EAGAIN
        assert!(!err.is_permission_denied());
    }

    #[test]
    fn test_error_messages() {
        let err = DecodeError::UnrecognizedKind(0x0000_0400);
        assert_eq!(err.to_string(), "unrecognized event kind 0x00000400");

        let err = DecodeError::Truncated {
            expected: 52,
            actual: 40,
        };
        assert_eq!(err.to_string(), "message truncated: expected 52 bytes, got 40");

        let err = TransportError::ShortRead {
            expected: 16,
            actual: 3,
        };
        assert_eq!(err.to_string(), "short read: expected at least 16 bytes, got 3");

        assert_eq!(Error::AlreadyListening.to_string(), "receive loop already running");
        assert_eq!(Error::Stopped.to_string(), "listener already stopped");
    }

    #[test]
    fn test_transparent_conversions() {
        let err: Error = DecodeError::Truncated {
            expected: 52,
            actual: 12,
        }
        .into();
        assert_eq!(err.to_string(), "message truncated: expected 52 bytes, got 12");
        assert!(!err.is_permission_denied());
    }
}
