use super::{path_drop_guard::PathDropGuard, Peer, Role, Socket};
use crate::{c_wrappers, Address, Result};
use std::{
    env,
    os::fd::{AsFd, OwnedFd},
    path::Path,
    sync::Mutex,
};

/// A builder for [`Socket`]s.
///
/// [`Socket::new_server()`], [`Socket::new_client()`] and [`Socket::new_pair()`] are shorthands for
/// the terminal methods of a default-constructed options table.
#[derive(Clone, Debug)]
pub struct SocketOptions {
    pub(super) nonblocking: bool,
    pub(super) initial_recv_size: usize,
    pub(super) spill_oversized: bool,
    pub(super) max_spilled_size: u64,
}

/// Creation.
impl SocketOptions {
    /// Creates an options table with default values.
    #[inline]
    pub fn new() -> Self {
        Self {
            nonblocking: false,
            initial_recv_size: 4096,
            spill_oversized: cfg!(jsoncomm_memfd),
            max_spilled_size: 64 << 20,
        }
    }
}

/// Option setters.
impl SocketOptions {
    builder_setters! {
        /// Creates the socket in nonblocking mode, in which [`recv()`](Socket::recv) fails with
        /// [`WouldBlock`](std::io::ErrorKind::WouldBlock) instead of waiting.
        ///
        /// The default value is `false`.
        nonblocking: bool,
        /// Sets the first receive buffer size tried on platforms which cannot report the size of
        /// a pending datagram up front. The buffer is doubled until the datagram fits.
        ///
        /// The default value is 4096. Linux ignores this.
        initial_recv_size: usize,
        /// Sets whether payloads too large for a single datagram are sent through a sealed
        /// memory file instead of failing with `EMSGSIZE`.
        ///
        /// Enabled by default where `memfd_create` is available. Has no effect elsewhere.
        spill_oversized: bool,
        /// Sets the largest payload accepted from a sealed memory file on receipt. Larger ones
        /// fail with [`InvalidData`](std::io::ErrorKind::InvalidData) without being read.
        ///
        /// The default value is 64 MiB.
        max_spilled_size: u64,
    }
}

/// Socket constructors.
impl SocketOptions {
    /// Creates a server socket bound to the given filesystem path.
    ///
    /// The socket file is created by this call and removed when the socket is closed or dropped.
    ///
    /// # Errors
    /// Fails with [`AddrInUse`](std::io::ErrorKind::AddrInUse) if the path already exists, which
    /// includes the case of another server currently listening on it.
    pub fn create_server(self, path: impl AsRef<Path>) -> Result<Socket> {
        let path = path.as_ref();
        let (addr, len) = Address::from(path).to_sockaddr()?;
        // Unlinking on close must not depend on the working directory at that time
        let absolute = if path.is_absolute() {
            path.to_owned()
        } else {
            env::current_dir()?.join(path)
        };

        let fd = c_wrappers::create_socket(self.nonblocking)?;
        unsafe {
            // SAFETY: addr and len come from to_sockaddr()
            c_wrappers::bind(fd.as_fd(), &addr, len)?;
        }
        log::debug!("bound server socket at {}", absolute.display());
        let drop_guard = PathDropGuard::new(absolute);
        Ok(self.assemble(fd, Role::Server, Peer::None, drop_guard))
    }

    /// Creates a client socket whose default destination is `destination`.
    ///
    /// The socket gets no filesystem name. On Linux and Android it is autobound to a unique name
    /// in the abstract namespace, which is what allows servers to reply to it.
    pub fn create_client(self, destination: impl Into<Address>) -> Result<Socket> {
        let destination = destination.into();
        let fd = c_wrappers::create_socket(self.nonblocking)?;
        #[cfg(jsoncomm_abstract_ns)]
        c_wrappers::autobind(fd.as_fd())?;
        log::debug!("created client socket for {destination}");
        Ok(self.assemble(fd, Role::Client, Peer::Address(destination), PathDropGuard::dummy()))
    }

    /// Creates a pair of unnamed sockets connected to each other. Sending without a destination
    /// on either end delivers to the other one.
    pub fn create_pair(self) -> Result<(Socket, Socket)> {
        let (a, b) = c_wrappers::create_pair(self.nonblocking)?;
        let a = self
            .clone()
            .assemble(a, Role::Client, Peer::Connected, PathDropGuard::dummy());
        let b = self.assemble(b, Role::Client, Peer::Connected, PathDropGuard::dummy());
        Ok((a, b))
    }

    fn assemble(self, fd: OwnedFd, role: Role, peer: Peer, drop_guard: PathDropGuard) -> Socket {
        Socket {
            fd: Some(fd),
            role,
            peer,
            drop_guard,
            initial_recv_size: self.initial_recv_size.max(1),
            spill_oversized: self.spill_oversized,
            max_spilled_size: self.max_spilled_size,
            recv_lock: Mutex::new(()),
        }
    }
}

impl Default for SocketOptions {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
