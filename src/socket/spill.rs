//! Out-of-band transfer of payloads which do not fit into a single datagram.
//!
//! The payload is written into a sealed memory file which travels as the last descriptor of the
//! message, and the datagram itself only carries a small envelope pointing at it. The envelope
//! starts with a nul byte, which no JSON text can start with, so user payloads never collide with
//! it.

use crate::{FdSet, Result};
use serde_json::Value;
use std::{io, os::fd::OwnedFd};

const MARKER: u8 = 0;
const ENVELOPE_KEY: &str = "$jsoncomm";
const FD_KEY: &str = "payload-fd";

/// Seals every spilled payload must carry before the receiver trusts its size and contents.
#[cfg(jsoncomm_memfd)]
const REQUIRED_SEALS: libc::c_int = libc::F_SEAL_WRITE | libc::F_SEAL_SHRINK | libc::F_SEAL_GROW;

/// Writes `data` to a fresh memory file and seals it against modification.
#[cfg(jsoncomm_memfd)]
pub(super) fn seal_payload(data: &[u8]) -> io::Result<OwnedFd> {
    use crate::c_wrappers;
    use std::{fs::File, io::Write, os::fd::AsFd};

    let mut file = File::from(c_wrappers::memfd_create(c"jsoncomm-payload")?);
    file.write_all(data)?;
    c_wrappers::add_seals(file.as_fd(), libc::F_SEAL_SEAL | REQUIRED_SEALS)?;
    Ok(file.into())
}

/// The envelope sent in place of a spilled payload whose file is descriptor number `index`.
#[cfg(jsoncomm_memfd)]
pub(super) fn envelope(index: usize) -> Vec<u8> {
    let mut out = vec![MARKER];
    out.extend(
        serde_json::json!({ ENVELOPE_KEY: { FD_KEY: index } })
            .to_string()
            .into_bytes(),
    );
    out
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// If `bytes` is a spill envelope, removes the payload descriptor from `fds` and returns the
/// payload read from it. Anything else is left alone and yields `None`.
///
/// An envelope which does not point at the last descriptor, or whose descriptor is not a sealed
/// memory file of at most `max_size` bytes, fails with
/// [`InvalidData`](io::ErrorKind::InvalidData).
pub(super) fn unspill(bytes: &[u8], fds: &mut FdSet, max_size: u64) -> Result<Option<Vec<u8>>> {
    let Some(envelope) = bytes.strip_prefix(&[MARKER]) else {
        return Ok(None);
    };
    let index = serde_json::from_slice::<Value>(envelope)
        .ok()
        .and_then(|v| v.get(ENVELOPE_KEY)?.get(FD_KEY)?.as_u64());
    let last = fds.len().checked_sub(1).map(|i| i as u64);
    if index.is_none() || index != last {
        return Err(invalid("malformed spill envelope").into());
    }
    let fd = fds
        .pop()
        .ok_or_else(|| invalid("spilled payload descriptor is missing"))?;
    let data = read_sealed(fd, max_size)?;
    log::debug!("read {} byte spilled payload", data.len());
    Ok(Some(data))
}

#[cfg(jsoncomm_memfd)]
fn read_sealed(fd: OwnedFd, max_size: u64) -> Result<Vec<u8>> {
    use crate::c_wrappers;
    use std::{fs::File, os::fd::AsFd, os::unix::fs::FileExt};

    let seals = c_wrappers::get_seals(fd.as_fd())
        .map_err(|e| invalid(format!("spilled payload is not a memory file: {e}")))?;
    if seals & REQUIRED_SEALS != REQUIRED_SEALS {
        return Err(invalid("spilled payload file is not sealed").into());
    }
    let file = File::from(fd);
    // Sealed against resizing, so the size cannot change after this point
    let size = file.metadata()?.len();
    if size > max_size {
        return Err(invalid(format!(
            "spilled payload of {size} bytes exceeds the limit of {max_size} bytes"
        ))
        .into());
    }
    let mut data = vec![0; usize::try_from(size).map_err(|_| invalid("spilled payload too large"))?];
    // The file offset is shared with the sender, so read positionally
    file.read_exact_at(&mut data, 0)?;
    Ok(data)
}
#[cfg(not(jsoncomm_memfd))]
fn read_sealed(_fd: OwnedFd, _max_size: u64) -> Result<Vec<u8>> {
    Err(invalid("spilled payloads are not supported on this platform").into())
}

#[cfg(all(test, jsoncomm_memfd))]
mod tests {
    use super::*;
    use crate::{c_wrappers, Error};
    use std::{fs::File, os::fd::AsFd, os::unix::fs::FileExt};

    fn scratch() -> OwnedFd {
        OwnedFd::from(tempfile::tempfile().unwrap())
    }
    fn is_invalid_data(r: Result<Option<Vec<u8>>>) -> bool {
        matches!(r, Err(Error::Io(e)) if e.kind() == io::ErrorKind::InvalidData)
    }

    #[test]
    fn roundtrip() {
        let data = br#"{"big":"payload"}"#;
        let sealed = seal_payload(data).unwrap();
        let mut fds: FdSet = vec![scratch(), sealed].into();
        let back = unspill(&envelope(1), &mut fds, u64::MAX).unwrap();
        assert_eq!(back.as_deref(), Some(&data[..]));
        assert_eq!(fds.len(), 1, "the payload descriptor is removed from the set");
    }

    #[test]
    fn sealed_against_writes() {
        let sealed = File::from(seal_payload(b"x").unwrap());
        assert!(sealed.write_at(b"y", 0).is_err(), "F_SEAL_WRITE forbids writes");
    }

    #[test]
    fn ordinary_payloads_pass_through() {
        let mut fds: FdSet = vec![scratch()].into();
        let lookalike = br#"{"$jsoncomm":{"payload-fd":0}}"#;
        assert!(unspill(lookalike, &mut fds, u64::MAX).unwrap().is_none());
        assert_eq!(fds.len(), 1, "descriptors of ordinary payloads are left alone");
    }

    #[test]
    fn envelope_must_point_at_last_descriptor() {
        let mut fds: FdSet = vec![scratch()].into();
        assert!(is_invalid_data(unspill(&envelope(3), &mut fds, u64::MAX)));
        let mut empty = FdSet::new();
        assert!(is_invalid_data(unspill(&envelope(0), &mut empty, u64::MAX)));
        assert!(is_invalid_data(unspill(b"\0garbage", &mut empty, u64::MAX)));
    }

    #[test]
    fn unsealed_file_is_rejected() {
        let file = tempfile::tempfile().unwrap();
        file.write_all_at(br#"{"hijacked":true}"#, 0).unwrap();
        let mut fds: FdSet = vec![OwnedFd::from(file)].into();
        assert!(is_invalid_data(unspill(&envelope(0), &mut fds, u64::MAX)));
    }

    #[test]
    fn size_is_capped() {
        let file = File::from(c_wrappers::memfd_create(c"jsoncomm-test").unwrap());
        // Sparse, so nothing is actually allocated by this
        file.set_len(1 << 34).unwrap();
        c_wrappers::add_seals(file.as_fd(), REQUIRED_SEALS).unwrap();
        let mut fds: FdSet = vec![OwnedFd::from(file)].into();
        assert!(is_invalid_data(unspill(&envelope(0), &mut fds, 1 << 20)));
    }
}
