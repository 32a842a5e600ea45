//! Encoding and decoding of `SCM_RIGHTS` control messages.

use libc::{c_int, c_uint, cmsghdr, msghdr, SCM_RIGHTS, SOL_SOCKET};
use std::{
    io,
    mem::{size_of, zeroed},
    os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
    ptr,
};

/// The largest number of file descriptors that can accompany a single message.
///
/// This is `SCM_MAX_FD` from the Linux kernel, which is hard-coded there. Other systems are not
/// less permissive in practice, so the same cap is enforced everywhere; sending more fails with
/// [`InvalidInput`](io::ErrorKind::InvalidInput) before any system call is made.
pub const MAX_FDS_PER_MESSAGE: usize = 253;

/// A **c**ontrol **m**e**s**sa**g**e buffer, aligned for `cmsghdr` by construction.
pub(crate) struct CmsgBuffer {
    storage: Vec<cmsghdr>,
    len: usize,
}
impl CmsgBuffer {
    fn with_space(space: usize) -> Self {
        let elements = space.div_ceil(size_of::<cmsghdr>());
        let zero: cmsghdr = unsafe {
            // SAFETY: cmsghdr is plain old data
            zeroed()
        };
        Self {
            storage: vec![zero; elements],
            len: space,
        }
    }
    /// A buffer large enough to receive the biggest `SCM_RIGHTS` message the kernel can produce.
    pub(crate) fn for_recv() -> Self {
        let payload = (MAX_FDS_PER_MESSAGE * size_of::<c_int>()) as c_uint;
        Self::with_space(unsafe {
            // SAFETY: pure arithmetic
            libc::CMSG_SPACE(payload)
        } as usize)
    }
    /// Encodes `fds` as a single `SCM_RIGHTS` message. An empty slice produces an empty buffer.
    pub(crate) fn encode(fds: &[BorrowedFd<'_>]) -> io::Result<Self> {
        if fds.is_empty() {
            return Ok(Self {
                storage: Vec::new(),
                len: 0,
            });
        }
        if fds.len() > MAX_FDS_PER_MESSAGE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cannot send {} file descriptors in one message, the limit is {MAX_FDS_PER_MESSAGE}",
                    fds.len()
                ),
            ));
        }
        let raw: Vec<RawFd> = fds.iter().map(AsRawFd::as_raw_fd).collect();
        let payload = (raw.len() * size_of::<RawFd>()) as c_uint;
        let mut buf = Self::with_space(unsafe {
            // SAFETY: pure arithmetic
            libc::CMSG_SPACE(payload)
        } as usize);

        let mut hdr: msghdr = unsafe {
            // SAFETY: msghdr is plain old data
            zeroed()
        };
        buf.attach_to(&mut hdr);
        unsafe {
            // SAFETY: the buffer has CMSG_SPACE(payload) bytes, so the first header and its data
            // fit, and the storage is aligned for cmsghdr
            let cmsg = libc::CMSG_FIRSTHDR(&hdr);
            (*cmsg).cmsg_level = SOL_SOCKET;
            (*cmsg).cmsg_type = SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(payload) as _;
            ptr::copy_nonoverlapping(
                raw.as_ptr().cast::<u8>(),
                libc::CMSG_DATA(cmsg),
                payload as usize,
            );
        }
        Ok(buf)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }
    /// Points the control fields of `hdr` at this buffer, or clears them if it is empty.
    pub(crate) fn attach_to(&mut self, hdr: &mut msghdr) {
        if self.is_empty() {
            hdr.msg_control = ptr::null_mut();
            hdr.msg_controllen = 0;
        } else {
            hdr.msg_control = self.storage.as_mut_ptr().cast();
            hdr.msg_controllen = self.len as _;
        }
    }
}

/// Takes ownership of every descriptor carried by the control messages `hdr` refers to, after
/// `recvmsg` returned.
///
/// # Safety
/// `hdr` must describe a control buffer filled out by a successful `recvmsg` call, and the
/// descriptors in it must not be owned by anything else.
pub(crate) unsafe fn take_fds(hdr: &msghdr) -> Vec<OwnedFd> {
    let mut fds = Vec::new();
    if hdr.msg_control.is_null() || hdr.msg_controllen == 0 {
        return fds;
    }
    let header_len = unsafe {
        // SAFETY: pure arithmetic
        libc::CMSG_LEN(0)
    } as usize;
    let mut cmsg = unsafe {
        // SAFETY: as per safety contract
        libc::CMSG_FIRSTHDR(hdr)
    };
    while !cmsg.is_null() {
        // SAFETY: CMSG_FIRSTHDR and CMSG_NXTHDR only yield headers inside the buffer
        let (level, ty, len) = unsafe { ((*cmsg).cmsg_level, (*cmsg).cmsg_type, (*cmsg).cmsg_len as usize) };
        if level == SOL_SOCKET && ty == SCM_RIGHTS {
            let count = len.saturating_sub(header_len) / size_of::<RawFd>();
            let data = unsafe {
                // SAFETY: as above
                libc::CMSG_DATA(cmsg)
            };
            for i in 0..count {
                let raw = unsafe {
                    // SAFETY: the kernel wrote `count` descriptors here; the data is not
                    // necessarily aligned for c_int
                    ptr::read_unaligned(data.add(i * size_of::<RawFd>()).cast::<RawFd>())
                };
                // SAFETY: as per safety contract, these were just installed for us
                fds.push(unsafe { OwnedFd::from_raw_fd(raw) });
            }
        }
        cmsg = unsafe {
            // SAFETY: cmsg is a valid header of hdr's buffer
            libc::CMSG_NXTHDR(hdr, cmsg)
        };
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    for fd in &fds {
        use std::os::fd::AsFd;
        // Best effort: MSG_CMSG_CLOEXEC does not exist here, so the flag is set after the fact
        let _ = crate::c_wrappers::set_cloexec(fd.as_fd());
    }
    fds
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;

    #[test]
    fn empty_encodes_to_nothing() {
        let buf = CmsgBuffer::encode(&[]).unwrap();
        assert!(buf.is_empty(), "no control message for no descriptors");
    }

    #[test]
    fn too_many_descriptors() {
        let file = tempfile::tempfile().unwrap();
        let fds = vec![file.as_fd(); MAX_FDS_PER_MESSAGE + 1];
        let e = CmsgBuffer::encode(&fds).err().unwrap();
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn encoded_header() {
        let file = tempfile::tempfile().unwrap();
        let fds = [file.as_fd(), file.as_fd()];
        let mut buf = CmsgBuffer::encode(&fds).unwrap();
        let mut hdr: msghdr = unsafe { zeroed() };
        buf.attach_to(&mut hdr);
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&hdr);
            assert!(!cmsg.is_null(), "buffer holds a header");
            assert_eq!((*cmsg).cmsg_level, SOL_SOCKET);
            assert_eq!((*cmsg).cmsg_type, SCM_RIGHTS);
            assert_eq!((*cmsg).cmsg_len as usize, libc::CMSG_LEN(8) as usize);
            let first = ptr::read_unaligned(libc::CMSG_DATA(cmsg).cast::<RawFd>());
            assert_eq!(first, file.as_raw_fd());
        }
    }
}
