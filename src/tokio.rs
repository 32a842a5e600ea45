//! Tokio-based asynchronous wrapper around [`Socket`](crate::Socket).
//!
//! The wrapper registers the socket with the reactor of the current runtime and retries the
//! synchronous operations whenever the reactor reports readiness. Messages, descriptor sets and
//! errors are the same as in the synchronous API.

use crate::{Address, Error, Message, Result, Socket as SyncSocket};
use ::tokio::io::unix::AsyncFd;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{
    io,
    os::fd::{AsRawFd, BorrowedFd, RawFd},
};

struct Registered {
    fd: RawFd,
    socket: SyncSocket,
}
impl AsRawFd for Registered {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

/// A [`Socket`](crate::Socket) registered with a Tokio reactor.
///
/// Must be created and used from within a Tokio runtime with I/O enabled.
pub struct Socket(AsyncFd<Registered>);
impl Socket {
    /// Registers `socket` with the reactor of the current runtime, switching it to nonblocking
    /// mode.
    ///
    /// # Errors
    /// [`Error::Closed`] if the socket was already closed, [`Error::Io`] if there is no runtime or
    /// registration fails.
    pub fn new(socket: SyncSocket) -> Result<Self> {
        let fd = socket.fileno()?;
        socket.set_nonblocking(true)?;
        Ok(Self(AsyncFd::new(Registered { fd, socket })?))
    }

    /// Waits for a message and decodes its payload as a generic JSON [`Value`].
    #[inline]
    pub async fn recv(&self) -> Result<Message<Value>> {
        self.recv_as().await
    }
    /// Waits for a message and decodes its payload into `T`.
    pub async fn recv_as<T: DeserializeOwned>(&self) -> Result<Message<T>> {
        loop {
            let mut guard = self.0.readable().await?;
            match guard.get_inner().socket.recv_as() {
                Err(e) if is_would_block(&e) => guard.clear_ready(),
                result => return result,
            }
        }
    }

    /// Sends `value` to the default peer, waiting for buffer space if necessary.
    pub async fn send<T: Serialize + ?Sized>(&self, value: &T, fds: &[BorrowedFd<'_>]) -> Result<()> {
        loop {
            let mut guard = self.0.writable().await?;
            match guard.get_inner().socket.send(value, fds) {
                Err(e) if is_would_block(&e) => guard.clear_ready(),
                result => return result,
            }
        }
    }
    /// Sends `value` to `destination`, waiting for buffer space if necessary.
    pub async fn send_to<T: Serialize + ?Sized>(
        &self,
        value: &T,
        destination: &Address,
        fds: &[BorrowedFd<'_>],
    ) -> Result<()> {
        loop {
            let mut guard = self.0.writable().await?;
            match guard.get_inner().socket.send_to(value, destination, fds) {
                Err(e) if is_would_block(&e) => guard.clear_ready(),
                result => return result,
            }
        }
    }

    /// Borrows the synchronous socket.
    #[inline]
    pub fn get_ref(&self) -> &SyncSocket {
        &self.0.get_ref().socket
    }
    /// Deregisters the socket from the reactor and returns it, still in nonblocking mode.
    #[inline]
    pub fn into_inner(self) -> SyncSocket {
        self.0.into_inner().socket
    }
}

fn is_would_block(e: &Error) -> bool {
    e.io_kind() == Some(io::ErrorKind::WouldBlock)
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Socket").field(self.get_ref()).finish()
    }
}
