mod options;
mod path_drop_guard;
mod spill;

pub use options::*;

use crate::{
    c_wrappers,
    cmsg::{self, CmsgBuffer},
    Address, Error, FdSet, Result,
};
use libc::{c_int, msghdr, sockaddr_un, socklen_t};
use path_drop_guard::PathDropGuard;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{
    fmt::{self, Debug, Formatter},
    io,
    mem::{size_of, zeroed},
    os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
    path::Path,
    ptr,
    sync::{Mutex, PoisonError},
};

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: c_int = libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: c_int = 0;

/// Whether a [`Socket`] owns a name in the filesystem or talks to one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Created by [`Socket::new_server()`]; owns its socket file.
    Server,
    /// Created by [`Socket::new_client()`] or [`Socket::new_pair()`]; owns no filesystem name.
    Client,
}

/// Where sends without an explicit destination go.
#[derive(Clone, Debug)]
enum Peer {
    None,
    Address(Address),
    /// The kernel already knows, as with `socketpair()`.
    Connected,
}

/// One received message: the decoded payload, the descriptors which came with it and the address
/// of the socket which sent it.
#[derive(Debug)]
pub struct Message<T = Value> {
    /// The decoded JSON payload.
    pub payload: T,
    /// The descriptors attached to the message, owned by the receiver now.
    pub fds: FdSet,
    /// The sender, which replies can be addressed to with [`Socket::send_to()`].
    pub sender: Address,
}
impl<T> Message<T> {
    /// Splits the message into its parts.
    #[inline]
    pub fn into_parts(self) -> (T, FdSet, Address) {
        (self.payload, self.fds, self.sender)
    }
}

/// A Unix domain datagram socket which exchanges JSON values together with file descriptors.
///
/// Every [`send`](Self::send) transmits exactly one datagram carrying one JSON document, with the
/// descriptors attached as `SCM_RIGHTS` ancillary data, and every [`recv`](Self::recv) consumes
/// exactly one. Since there are no connections, a single server can talk to any number of
/// clients: replies are addressed to the [`sender`](Message::sender) of the request.
///
/// # Closing
/// [`close()`](Self::close) releases the socket and, for servers, removes the socket file. The
/// same happens on drop. After closing, every operation fails with [`Error::Closed`].
/// [`scoped()`](Self::scoped) closes the socket at the end of a closure no matter how the closure
/// exits.
///
/// # Readiness
/// The socket does not poll. To multiplex it, register [`as_fd()`](Self::as_fd) with an event
/// loop and call [`recv()`](Self::recv) once it reports the descriptor as readable. The `tokio`
/// feature provides [a ready-made adapter](crate::tokio::Socket).
///
/// # Example
/// ```
#[doc = doctest_file::include_doctest!("demos/ping_pong.rs")]
/// ```
pub struct Socket {
    // Dropped before the guard, so the file is only unlinked once the socket is gone
    fd: Option<OwnedFd>,
    role: Role,
    peer: Peer,
    drop_guard: PathDropGuard,
    #[cfg_attr(jsoncomm_peek_trunc, allow(dead_code))]
    initial_recv_size: usize,
    spill_oversized: bool,
    max_spilled_size: u64,
    // Sizing and reading a datagram must not interleave with another receiver
    recv_lock: Mutex<()>,
}

/// Constructors.
impl Socket {
    /// Creates a server socket bound to `path` with default [options](SocketOptions).
    ///
    /// See [`SocketOptions::create_server()`].
    #[inline]
    pub fn new_server(path: impl AsRef<Path>) -> Result<Self> {
        SocketOptions::new().create_server(path)
    }
    /// Creates a client socket which sends to `destination` by default, with default
    /// [options](SocketOptions).
    ///
    /// See [`SocketOptions::create_client()`].
    #[inline]
    pub fn new_client(destination: impl Into<Address>) -> Result<Self> {
        SocketOptions::new().create_client(destination)
    }
    /// Creates two connected sockets with default [options](SocketOptions).
    ///
    /// See [`SocketOptions::create_pair()`].
    #[inline]
    pub fn new_pair() -> Result<(Self, Self)> {
        SocketOptions::new().create_pair()
    }
}

/// Handles and state.
impl Socket {
    /// Borrows the underlying socket descriptor, for registration with an event loop.
    pub fn as_fd(&self) -> Result<BorrowedFd<'_>> {
        self.fd.as_ref().map(AsFd::as_fd).ok_or(Error::Closed)
    }
    /// Returns the raw value of the underlying socket descriptor.
    #[inline]
    pub fn fileno(&self) -> Result<RawFd> {
        self.as_fd().map(|fd| fd.as_raw_fd())
    }
    /// Returns `true` once the socket was closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.fd.is_none()
    }
    /// Returns how the socket was created.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }
    /// Returns the socket file this server owns, in absolute form. `None` for clients and after
    /// closing.
    #[inline]
    pub fn bound_path(&self) -> Option<&Path> {
        self.drop_guard.path()
    }
    /// Returns the default destination, if one was given at creation.
    pub fn default_peer(&self) -> Option<&Address> {
        match &self.peer {
            Peer::Address(a) => Some(a),
            Peer::None | Peer::Connected => None,
        }
    }
    /// Returns the address peers see as the sender of this socket's messages.
    pub fn local_addr(&self) -> Result<Address> {
        let (addr, len) = c_wrappers::local_addr(self.as_fd()?)?;
        Ok(Address::from_sockaddr(&addr, len))
    }
    /// Enables or disables nonblocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        Ok(c_wrappers::set_nonblocking(self.as_fd()?, nonblocking)?)
    }
    /// Checks whether the socket is in nonblocking mode.
    pub fn is_nonblocking(&self) -> Result<bool> {
        Ok(c_wrappers::get_nonblocking(self.as_fd()?)?)
    }

    /// Closes the socket and, if this is a server, removes its socket file. Does nothing if the
    /// socket is already closed.
    pub fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            log::debug!("closing socket {}", fd.as_raw_fd());
            drop(fd);
        }
        self.drop_guard.unlink();
    }

    /// Runs `f` on the socket and closes the socket afterwards, whether `f` returns normally,
    /// returns an error or panics.
    ///
    /// The result of `f` is passed through untouched; closing cannot fail and thus never replaces
    /// an error on its way out.
    pub fn scoped<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let mut guard = scopeguard::guard(self, |socket| socket.close());
        f(&mut **guard)
    }
}

/// Sending.
impl Socket {
    /// Sends `value` to the default peer, attaching `fds`.
    ///
    /// The descriptors are duplicated into the receiving process by the kernel; the caller keeps
    /// its own copies.
    ///
    /// # Errors
    /// - [`Error::Closed`] if the socket was closed
    /// - [`Error::NoDestination`] if the socket is a server, which has no default peer
    /// - [`Error::Payload`] if `value` cannot be serialized
    /// - [`Error::Io`] if the destination does not exist or the kernel rejects the message
    pub fn send<T: Serialize + ?Sized>(&self, value: &T, fds: &[BorrowedFd<'_>]) -> Result<()> {
        self.send_inner(value, None, fds)
    }
    /// Sends `value` to `destination`, attaching `fds`. Fails the same way as
    /// [`send()`](Self::send), except for [`Error::NoDestination`].
    pub fn send_to<T: Serialize + ?Sized>(
        &self,
        value: &T,
        destination: &Address,
        fds: &[BorrowedFd<'_>],
    ) -> Result<()> {
        self.send_inner(value, Some(destination), fds)
    }
    /// Sends `value` to the default peer and waits for one message in return.
    pub fn send_and_recv<T: Serialize + ?Sized>(&self, value: &T, fds: &[BorrowedFd<'_>]) -> Result<Message> {
        self.send(value, fds)?;
        self.recv()
    }

    fn send_inner<T: Serialize + ?Sized>(
        &self,
        value: &T,
        destination: Option<&Address>,
        fds: &[BorrowedFd<'_>],
    ) -> Result<()> {
        let fd = self.as_fd()?;
        let target = match (destination, &self.peer) {
            (Some(addr), _) | (None, Peer::Address(addr)) => Some(addr.to_sockaddr()?),
            (None, Peer::Connected) => None,
            (None, Peer::None) => return Err(Error::NoDestination),
        };
        let data = serde_json::to_vec(value)?;
        match transmit(fd, &data, target.as_ref(), fds) {
            Ok(()) => {
                log::debug!("sent {} bytes with {} descriptors", data.len(), fds.len());
                Ok(())
            }
            Err(e) if e.raw_os_error() == Some(libc::EMSGSIZE) && self.spill_oversized => {
                self.send_spilled(fd, &data, target.as_ref(), fds, e)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(jsoncomm_memfd)]
    fn send_spilled(
        &self,
        fd: BorrowedFd<'_>,
        data: &[u8],
        target: Option<&(sockaddr_un, socklen_t)>,
        fds: &[BorrowedFd<'_>],
        _original: io::Error,
    ) -> Result<()> {
        let sealed = spill::seal_payload(data)?;
        let mut all = fds.to_vec();
        all.push(sealed.as_fd());
        transmit(fd, &spill::envelope(fds.len()), target, &all)?;
        log::debug!(
            "sent {} bytes through a sealed memory file with {} descriptors",
            data.len(),
            fds.len()
        );
        Ok(())
    }
    #[cfg(not(jsoncomm_memfd))]
    fn send_spilled(
        &self,
        _fd: BorrowedFd<'_>,
        _data: &[u8],
        _target: Option<&(sockaddr_un, socklen_t)>,
        _fds: &[BorrowedFd<'_>],
        original: io::Error,
    ) -> Result<()> {
        Err(original.into())
    }
}

/// Receiving.
impl Socket {
    /// Waits for a message and decodes its payload as a generic JSON [`Value`].
    ///
    /// The descriptors are taken into an [`FdSet`] before anything else is looked at, so they are
    /// closed rather than leaked if decoding fails.
    ///
    /// # Errors
    /// - [`Error::Closed`] if the socket was closed
    /// - [`Error::Io`] if receiving failed, including
    ///   [`WouldBlock`](io::ErrorKind::WouldBlock) in nonblocking mode
    /// - [`Error::Truncated`] if the message or its descriptors did not arrive in full
    /// - [`Error::Payload`] if the payload is not valid JSON
    ///
    /// Payloads which the peer spilled into a memory file are read back from it, provided the
    /// file is sealed and within [the size limit](SocketOptions::max_spilled_size). A message
    /// claiming to be spilled which does not meet these conditions fails with an [`Error::Io`] of
    /// kind [`InvalidData`](io::ErrorKind::InvalidData).
    ///
    /// Concurrent calls from several threads are serialized, so that each one reads the datagram
    /// it sized.
    #[inline]
    pub fn recv(&self) -> Result<Message> {
        self.recv_as()
    }
    /// Like [`recv()`](Self::recv), but decodes the payload into `T`.
    pub fn recv_as<T: DeserializeOwned>(&self) -> Result<Message<T>> {
        let fd = self.as_fd()?;
        let _serial = self.recv_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let size = self.pending_size(fd)?;

        let mut buf = vec![0_u8; size.max(1)];
        let mut control = CmsgBuffer::for_recv();
        let mut addr: sockaddr_un = unsafe {
            // SAFETY: sockaddr_un is plain old data
            zeroed()
        };
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        };
        let mut hdr: msghdr = unsafe {
            // SAFETY: msghdr is plain old data
            zeroed()
        };
        hdr.msg_name = ptr::from_mut(&mut addr).cast();
        hdr.msg_namelen = size_of::<sockaddr_un>() as socklen_t;
        hdr.msg_iov = &mut iov;
        hdr.msg_iovlen = 1;
        control.attach_to(&mut hdr);

        let received = unsafe {
            // SAFETY: name, data and control buffers live on this stack frame with the
            // advertised lengths
            c_wrappers::recvmsg(fd, &mut hdr, RECV_FLAGS)?
        };
        let mut fds: FdSet = unsafe {
            // SAFETY: recvmsg succeeded and installed these descriptors for us alone
            cmsg::take_fds(&hdr)
        }
        .into();
        let sender = Address::from_sockaddr(&addr, hdr.msg_namelen);
        if hdr.msg_flags & (libc::MSG_TRUNC | libc::MSG_CTRUNC) != 0 {
            log::debug!("discarding truncated message from {sender}");
            return Err(Error::Truncated);
        }
        buf.truncate(received);
        log::debug!(
            "received {received} bytes with {} descriptors from {sender}",
            fds.len()
        );

        let payload = match spill::unspill(&buf, &mut fds, self.max_spilled_size)? {
            Some(data) => serde_json::from_slice(&data)?,
            None => serde_json::from_slice(&buf)?,
        };
        Ok(Message { payload, fds, sender })
    }

    // Another process sharing the socket can still take the datagram between the peek and the
    // read, which surfaces as Error::Truncated
    #[cfg(jsoncomm_peek_trunc)]
    fn pending_size(&self, fd: BorrowedFd<'_>) -> Result<usize> {
        let size = c_wrappers::peek_msg_size(fd)?;
        log::trace!("pending datagram is {size} bytes");
        Ok(size)
    }
    #[cfg(not(jsoncomm_peek_trunc))]
    fn pending_size(&self, fd: BorrowedFd<'_>) -> Result<usize> {
        let mut size = self.initial_recv_size;
        while c_wrappers::peek_is_truncated(fd, size)? {
            size = size.checked_mul(2).ok_or(Error::Truncated)?;
            log::trace!("pending datagram exceeds buffer, growing to {size} bytes");
        }
        Ok(size)
    }
}

fn transmit(
    fd: BorrowedFd<'_>,
    data: &[u8],
    target: Option<&(sockaddr_un, socklen_t)>,
    fds: &[BorrowedFd<'_>],
) -> io::Result<()> {
    let mut control = CmsgBuffer::encode(fds)?;
    let mut iov = libc::iovec {
        iov_base: data.as_ptr().cast_mut().cast(),
        iov_len: data.len(),
    };
    let mut hdr: msghdr = unsafe {
        // SAFETY: msghdr is plain old data
        zeroed()
    };
    if let Some((addr, len)) = target {
        hdr.msg_name = ptr::from_ref(addr).cast_mut().cast();
        hdr.msg_namelen = *len;
    }
    hdr.msg_iov = &mut iov;
    hdr.msg_iovlen = 1;
    control.attach_to(&mut hdr);

    let sent = c_wrappers::sendmsg(fd, &hdr)?;
    if sent != data.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("datagram was cut short, {sent} of {} bytes sent", data.len()),
        ));
    }
    Ok(())
}

impl Debug for Socket {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("fd", &self.fd.as_ref().map(AsRawFd::as_raw_fd))
            .field("role", &self.role)
            .field("peer", &self.peer)
            .field("bound_path", &self.drop_guard.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pair_roundtrip() {
        let (a, b) = Socket::new_pair().unwrap();
        a.send(&json!({"n": 1}), &[]).unwrap();
        let msg = b.recv().unwrap();
        assert_eq!(msg.payload, json!({"n": 1}));
        assert!(msg.fds.is_empty());
        assert!(msg.sender.is_unnamed(), "socketpair ends have no names");
    }

    #[test]
    fn closed_socket_refuses_everything() {
        let (mut a, _b) = Socket::new_pair().unwrap();
        a.close();
        a.close();
        assert!(a.is_closed());
        assert!(matches!(a.fileno(), Err(Error::Closed)));
        assert!(matches!(a.send(&json!(null), &[]), Err(Error::Closed)));
        assert!(matches!(a.recv(), Err(Error::Closed)));
        assert!(matches!(a.set_nonblocking(true), Err(Error::Closed)));
    }

    #[test]
    fn nonblocking_recv_would_block() {
        let (a, _b) = SocketOptions::new().nonblocking(true).create_pair().unwrap();
        assert!(a.is_nonblocking().unwrap());
        let e = a.recv().unwrap_err();
        assert_eq!(e.io_kind(), Some(io::ErrorKind::WouldBlock));
        a.set_nonblocking(false).unwrap();
        assert!(!a.is_nonblocking().unwrap());
    }

    #[test]
    fn invalid_json_is_a_payload_error() {
        let (a, b) = Socket::new_pair().unwrap();
        transmit(a.as_fd().unwrap(), b"{not json", None, &[]).unwrap();
        assert!(matches!(b.recv(), Err(Error::Payload(..))));
    }

    #[cfg(jsoncomm_memfd)]
    #[test]
    fn forged_envelopes_are_rejected() {
        use std::os::unix::fs::FileExt;

        let (a, b) = Socket::new_pair().unwrap();
        let sparse = tempfile::tempfile().unwrap();
        sparse.set_len(1 << 34).unwrap();
        transmit(a.as_fd().unwrap(), &spill::envelope(0), None, &[sparse.as_fd()]).unwrap();
        let e = b.recv().unwrap_err();
        assert_eq!(e.io_kind(), Some(io::ErrorKind::InvalidData), "got {e:?}");

        let lying = tempfile::tempfile().unwrap();
        lying.write_all_at(br#"{"hijacked":true}"#, 0).unwrap();
        transmit(a.as_fd().unwrap(), &spill::envelope(0), None, &[lying.as_fd()]).unwrap();
        let e = b.recv().unwrap_err();
        assert_eq!(e.io_kind(), Some(io::ErrorKind::InvalidData), "got {e:?}");

        a.send(&json!(1), &[]).unwrap();
        assert_eq!(b.recv().unwrap().payload, json!(1), "the socket stays usable");
    }

    #[test]
    fn typed_payloads() {
        let (a, b) = Socket::new_pair().unwrap();
        a.send(&[1_u32, 2, 3], &[]).unwrap();
        let msg = b.recv_as::<Vec<u32>>().unwrap();
        assert_eq!(msg.payload, vec![1, 2, 3]);
    }
}
