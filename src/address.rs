use libc::{c_char, sockaddr_un, socklen_t, AF_UNIX};
use std::{
    ffi::OsString,
    fmt::{self, Display, Formatter},
    io,
    mem::{offset_of, size_of, zeroed},
    os::unix::ffi::{OsStrExt, OsStringExt},
    path::{Path, PathBuf},
};

/// The size of the `sun_path` field of `sockaddr_un` on the target platform. Filesystem paths
/// must be strictly shorter than this to leave room for the terminating nul; abstract names must
/// be strictly shorter because of their leading nul.
///
/// ## Value
/// **108** on Linux, Android, Solaris and illumos, **104** on the BSD family and Apple platforms.
pub const MAX_ADDRESS_LEN: usize = {
    let sun_path_offset = offset_of!(sockaddr_un, sun_path);
    size_of::<sockaddr_un>() - sun_path_offset
};

/// The name of a Unix domain datagram socket, as used for destinations and reported for senders.
///
/// ## `Path`
/// A socket file on the filesystem. Servers create this file when binding and remove it when
/// closed.
///
/// ## `Abstract`
/// A name in the Linux abstract socket namespace, which is detached from the filesystem and
/// disappears together with the socket. Client sockets are autobound to such a name so that
/// replies can reach them. **Only available on Linux and Android.**
///
/// ## `Unnamed`
/// The sender did not have a name. Such a peer cannot be replied to: sending to this address
/// fails with [`InvalidInput`](io::ErrorKind::InvalidInput).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Address {
    /// A socket without a name.
    Unnamed,
    /// A socket file located in the filesystem tree.
    Path(PathBuf),
    /// A name in the abstract namespace, without the leading nul byte.
    #[cfg(jsoncomm_abstract_ns)]
    #[cfg_attr(
        feature = "doc_cfg",
        doc(cfg(any(target_os = "linux", target_os = "android")))
    )]
    Abstract(Vec<u8>),
}
impl Address {
    /// Returns the filesystem path if this is a [`Path`](Self::Path) address.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Path(p) => Some(p),
            _ => None,
        }
    }
    /// Returns `true` for [`Unnamed`](Self::Unnamed).
    pub fn is_unnamed(&self) -> bool {
        matches!(self, Self::Unnamed)
    }

    pub(crate) fn to_sockaddr(&self) -> io::Result<(sockaddr_un, socklen_t)> {
        let mut addr: sockaddr_un = unsafe {
            // SAFETY: sockaddr_un is plain old data
            zeroed()
        };
        addr.sun_family = AF_UNIX as _;

        // Prefix and suffix are the nul bytes which surround the name itself
        let (name, prefix, suffix): (&[u8], usize, usize) = match self {
            Self::Unnamed => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "cannot send to an unnamed socket",
                ))
            }
            Self::Path(path) => {
                let bytes = path.as_os_str().as_bytes();
                if bytes.is_empty() || bytes.contains(&0) {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "socket path must be non-empty and contain no interior nul bytes",
                    ));
                }
                (bytes, 0, 1)
            }
            #[cfg(jsoncomm_abstract_ns)]
            Self::Abstract(name) => (name.as_slice(), 1, 0),
        };
        let total = prefix + name.len() + suffix;
        if total > addr.sun_path.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("socket name should not be longer than {} bytes", addr.sun_path.len() - 1),
            ));
        }
        for (dst, src) in addr.sun_path.iter_mut().skip(prefix).zip(name) {
            *dst = *src as c_char;
        }
        let len = offset_of!(sockaddr_un, sun_path) + total;
        Ok((addr, len as socklen_t))
    }

    /// Interprets the first `len` bytes of `addr`, as filled out by `recvmsg` or `getsockname`.
    pub(crate) fn from_sockaddr(addr: &sockaddr_un, len: socklen_t) -> Self {
        let name_len = (len as usize)
            .saturating_sub(offset_of!(sockaddr_un, sun_path))
            .min(addr.sun_path.len());
        let mut raw: Vec<u8> = addr.sun_path.iter().take(name_len).map(|&c| c as u8).collect();
        match raw.first().copied() {
            None => Self::Unnamed,
            #[cfg(jsoncomm_abstract_ns)]
            Some(0) => {
                raw.remove(0);
                Self::Abstract(raw)
            }
            Some(..) => {
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                if end == 0 {
                    return Self::Unnamed;
                }
                raw.truncate(end);
                Self::Path(PathBuf::from(OsString::from_vec(raw)))
            }
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unnamed => f.write_str("(unnamed)"),
            Self::Path(p) => Display::fmt(&p.display(), f),
            #[cfg(jsoncomm_abstract_ns)]
            Self::Abstract(name) => write!(f, "@{}", String::from_utf8_lossy(name)),
        }
    }
}

impl From<PathBuf> for Address {
    #[inline]
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}
impl From<&Path> for Address {
    #[inline]
    fn from(path: &Path) -> Self {
        Self::Path(path.to_owned())
    }
}
impl From<&str> for Address {
    #[inline]
    fn from(path: &str) -> Self {
        Self::Path(path.into())
    }
}
impl From<String> for Address {
    #[inline]
    fn from(path: String) -> Self {
        Self::Path(path.into())
    }
}
impl From<&Address> for Address {
    #[inline]
    fn from(addr: &Address) -> Self {
        addr.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_roundtrip() {
        let addr = Address::from("/tmp/jsoncomm/listener");
        let (raw, len) = addr.to_sockaddr().unwrap();
        assert_eq!(
            len as usize,
            offset_of!(sockaddr_un, sun_path) + "/tmp/jsoncomm/listener".len() + 1,
            "path length includes the nul terminator"
        );
        assert_eq!(Address::from_sockaddr(&raw, len), addr);
    }

    #[test]
    fn rejects_bad_paths() {
        let long = "x".repeat(MAX_ADDRESS_LEN);
        let e = Address::from(long).to_sockaddr().unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
        let e = Address::from("a\0b").to_sockaddr().unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
        let e = Address::Unnamed.to_sockaddr().unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn longest_path_fits() {
        let longest = "y".repeat(MAX_ADDRESS_LEN - 1);
        assert!(Address::from(longest).to_sockaddr().is_ok(), "one byte is left for the nul");
    }

    #[test]
    fn unnamed_from_short_length() {
        let raw: sockaddr_un = unsafe { zeroed() };
        assert!(Address::from_sockaddr(&raw, 0).is_unnamed());
        let family_only = offset_of!(sockaddr_un, sun_path) as socklen_t;
        assert!(Address::from_sockaddr(&raw, family_only).is_unnamed());
    }

    #[cfg(jsoncomm_abstract_ns)]
    #[test]
    fn abstract_roundtrip() {
        let addr = Address::Abstract(b"0001f".to_vec());
        let (raw, len) = addr.to_sockaddr().unwrap();
        assert_eq!(raw.sun_path[0], 0, "abstract names start with a nul byte");
        assert_eq!(Address::from_sockaddr(&raw, len), addr);
        assert_eq!(addr.to_string(), "@0001f");
    }
}
