use std::io;
use thiserror::Error;

/// Errors produced by [`Socket`](crate::Socket) and [`FdSet`](crate::FdSet).
///
/// Two kinds of failure are mixed in here. Misuse of the API, such as indexing past the end of a
/// descriptor set or touching a socket after closing it, means the calling code is wrong and is
/// flagged by [`is_programming_error()`](Self::is_programming_error). Everything else is a runtime
/// condition (the peer is gone, the address is taken, the bytes were not JSON) which callers are
/// expected to handle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A value handed to an [`FdSet`](crate::FdSet) constructor was not a non-negative integer
    /// file descriptor. The offending value is included in its JSON rendering.
    #[error("invalid file descriptor {0}")]
    InvalidDescriptor(String),
    /// A descriptor set was indexed outside of `0..len`.
    #[error("index {index} is out of range for a descriptor set of length {len}")]
    OutOfRange {
        /// The requested index.
        index: usize,
        /// The length of the set at the time of the access.
        len: usize,
    },
    /// The descriptor at this index was already stolen from its set.
    #[error("descriptor at index {0} was already stolen")]
    Stolen(usize),
    /// The socket or descriptor set was used after being closed.
    #[error("used after close")]
    Closed,
    /// A send without an explicit destination was attempted on a socket which has no default
    /// peer.
    #[error("no destination given and the socket has no default peer")]
    NoDestination,
    /// The received datagram or its ancillary data did not fit the receive buffers, or the
    /// kernel refused to pass some of the attached descriptors. The message is discarded.
    #[error("received message was truncated")]
    Truncated,
    /// The payload could not be serialized or the received bytes did not decode.
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
    /// A system call failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Returns `true` for errors caused by incorrect use of the API rather than by the
    /// environment.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidDescriptor(..)
                | Self::OutOfRange { .. }
                | Self::Stolen(..)
                | Self::Closed
                | Self::NoDestination
        )
    }
    /// Returns the kind of the underlying I/O error, if this is one.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Io(e) => Some(e.kind()),
            _ => None,
        }
    }
}
