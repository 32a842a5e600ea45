use libc::{c_int, msghdr, sockaddr, sockaddr_un, socklen_t, AF_UNIX, F_GETFL, F_SETFL, O_NONBLOCK, SOCK_DGRAM};
use std::{
    io,
    mem::{size_of, zeroed},
    os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd},
    ptr,
};
#[cfg(not(any(target_os = "linux", target_os = "android")))]
use std::os::fd::AsFd;

pub(crate) fn create_socket(nonblocking: bool) -> io::Result<OwnedFd> {
    #[allow(unused_mut, clippy::let_and_return)]
    let ty = {
        let mut ty = SOCK_DGRAM;
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            ty |= libc::SOCK_CLOEXEC;
            if nonblocking {
                ty |= libc::SOCK_NONBLOCK;
            }
        }
        ty
    };
    let (success, fd) = unsafe {
        let result = libc::socket(AF_UNIX, ty, 0);
        (result != -1, result)
    };
    let fd = ok_or_errno!(success => unsafe {
        // SAFETY: we just created this descriptor
        OwnedFd::from_raw_fd(fd)
    })?;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        set_nonblocking(fd.as_fd(), nonblocking)?;
        set_cloexec(fd.as_fd())?;
    }
    Ok(fd)
}

pub(crate) fn create_pair(nonblocking: bool) -> io::Result<(OwnedFd, OwnedFd)> {
    #[allow(unused_mut, clippy::let_and_return)]
    let ty = {
        let mut ty = SOCK_DGRAM;
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            ty |= libc::SOCK_CLOEXEC;
            if nonblocking {
                ty |= libc::SOCK_NONBLOCK;
            }
        }
        ty
    };
    let mut fds: [c_int; 2] = [-1, -1];
    let success = unsafe { libc::socketpair(AF_UNIX, ty, 0, fds.as_mut_ptr()) } != -1;
    let (a, b) = ok_or_errno!(success => unsafe {
        // SAFETY: socketpair() hands us two fresh descriptors
        (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1]))
    })?;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    for fd in [a.as_fd(), b.as_fd()] {
        set_nonblocking(fd, nonblocking)?;
        set_cloexec(fd)?;
    }
    Ok((a, b))
}

/// Binds the specified socket to the given address.
///
/// # Safety
/// `addr` must be a well-formed `AF_UNIX` address whose meaningful part is `len` bytes long.
pub(crate) unsafe fn bind(fd: BorrowedFd<'_>, addr: &sockaddr_un, len: socklen_t) -> io::Result<()> {
    let success = unsafe {
        // SAFETY: as per safety contract
        libc::bind(fd.as_raw_fd(), ptr::from_ref(addr).cast::<sockaddr>(), len)
    } != -1;
    ok_or_errno!(success => ())
}

/// Asks the kernel to assign the socket a unique name in the abstract namespace, which lets
/// peers reply to it without a socket file ever being created.
#[cfg(jsoncomm_abstract_ns)]
pub(crate) fn autobind(fd: BorrowedFd<'_>) -> io::Result<()> {
    let mut addr: sockaddr_un = unsafe {
        // SAFETY: sockaddr_un is plain old data
        zeroed()
    };
    addr.sun_family = AF_UNIX as _;
    // An address consisting of nothing but the family is the autobind request
    let len = size_of::<libc::sa_family_t>() as socklen_t;
    unsafe {
        // SAFETY: the family field is filled out and covered by len
        bind(fd, &addr, len)
    }
}

pub(crate) fn local_addr(fd: BorrowedFd<'_>) -> io::Result<(sockaddr_un, socklen_t)> {
    let mut addr: sockaddr_un = unsafe {
        // SAFETY: sockaddr_un is plain old data
        zeroed()
    };
    let mut len = size_of::<sockaddr_un>() as socklen_t;
    let success = unsafe {
        libc::getsockname(
            fd.as_raw_fd(),
            ptr::from_mut(&mut addr).cast::<sockaddr>(),
            &mut len,
        )
    } != -1;
    ok_or_errno!(success => (addr, len))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: c_int = 0;

/// Sends one datagram. A peer which has gone away yields `EPIPE` or `ECONNREFUSED` rather than
/// `SIGPIPE` where the platform allows suppressing the signal.
pub(crate) fn sendmsg(fd: BorrowedFd<'_>, hdr: &msghdr) -> io::Result<usize> {
    let (success, bytes_written) = unsafe {
        let result = libc::sendmsg(fd.as_raw_fd(), hdr, SEND_FLAGS);
        (result != -1, result as usize)
    };
    ok_or_errno!(success => bytes_written)
}

/// # Safety
/// Every buffer `hdr` points to must be valid for writes of the advertised length.
pub(crate) unsafe fn recvmsg(fd: BorrowedFd<'_>, hdr: &mut msghdr, flags: c_int) -> io::Result<usize> {
    let (success, bytes_read) = unsafe {
        // SAFETY: as per safety contract
        let result = libc::recvmsg(fd.as_raw_fd(), hdr, flags);
        (result != -1, result as usize)
    };
    ok_or_errno!(success => bytes_read)
}

/// Returns the size of the next datagram available on the socket without discarding it, waiting
/// for one to arrive if the socket is in blocking mode.
#[cfg(jsoncomm_peek_trunc)]
pub(crate) fn peek_msg_size(fd: BorrowedFd<'_>) -> io::Result<usize> {
    let mut buffer = [0_u8; 0];
    let (success, size) = unsafe {
        let size = libc::recv(
            fd.as_raw_fd(),
            buffer.as_mut_ptr().cast(),
            buffer.len(),
            libc::MSG_TRUNC | libc::MSG_PEEK,
        );
        (size != -1, size as usize)
    };
    ok_or_errno!(success => size)
}

/// Peeks at the next datagram with a buffer of `size` bytes and reports whether it was too
/// small. No control buffer is supplied, so no descriptors get installed by the peek.
#[cfg(not(jsoncomm_peek_trunc))]
pub(crate) fn peek_is_truncated(fd: BorrowedFd<'_>, size: usize) -> io::Result<bool> {
    let mut buf = vec![0_u8; size];
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    let mut hdr: msghdr = unsafe {
        // SAFETY: msghdr is plain old data, null pointers with zero lengths are valid
        zeroed()
    };
    hdr.msg_iov = &mut iov;
    hdr.msg_iovlen = 1;
    unsafe {
        // SAFETY: the only buffer is buf, which is valid for its whole length
        recvmsg(fd, &mut hdr, libc::MSG_PEEK)?;
    }
    Ok(hdr.msg_flags & libc::MSG_TRUNC != 0)
}

pub(crate) fn set_nonblocking(fd: BorrowedFd<'_>, nonblocking: bool) -> io::Result<()> {
    let (old_flags, success) = unsafe {
        // SAFETY: nothing too unsafe about this function. One thing to note is that we're passing
        // it a null pointer, which is, for some reason, required yet ignored for F_GETFL.
        let result = libc::fcntl(fd.as_raw_fd(), F_GETFL, ptr::null::<libc::c_void>());
        (result, result != -1)
    };
    if !success {
        return Err(io::Error::last_os_error());
    }
    let new_flags = if nonblocking {
        old_flags | O_NONBLOCK
    } else {
        old_flags & !O_NONBLOCK
    };
    let success = unsafe {
        // SAFETY: new_flags is a c_int, as documented in the manpage.
        libc::fcntl(fd.as_raw_fd(), F_SETFL, new_flags)
    } != -1;
    ok_or_errno!(success => ())
}
pub(crate) fn get_nonblocking(fd: BorrowedFd<'_>) -> io::Result<bool> {
    let flags = unsafe {
        // SAFETY: exactly the same as above.
        libc::fcntl(fd.as_raw_fd(), F_GETFL, ptr::null::<libc::c_void>())
    };
    ok_or_errno!(flags != -1 => flags & O_NONBLOCK != 0)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn set_cloexec(fd: BorrowedFd<'_>) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD, 0) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    let success = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, flags | libc::FD_CLOEXEC) } != -1;
    ok_or_errno!(success => ())
}

#[cfg(jsoncomm_memfd)]
pub(crate) fn memfd_create(name: &std::ffi::CStr) -> io::Result<OwnedFd> {
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC | libc::MFD_ALLOW_SEALING) };
    ok_or_errno!(fd != -1 => unsafe {
        // SAFETY: we just created this descriptor
        OwnedFd::from_raw_fd(fd)
    })
}

#[cfg(jsoncomm_memfd)]
pub(crate) fn add_seals(fd: BorrowedFd<'_>, seals: c_int) -> io::Result<()> {
    let success = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_ADD_SEALS, seals) } != -1;
    ok_or_errno!(success => ())
}

/// Returns the seals of a file. Fails with `EINVAL` for files which do not support sealing.
#[cfg(jsoncomm_memfd)]
pub(crate) fn get_seals(fd: BorrowedFd<'_>) -> io::Result<c_int> {
    let seals = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GET_SEALS) };
    ok_or_errno!(seals != -1 => seals)
}
