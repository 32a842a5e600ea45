use crate::{Error, Result};
use serde_json::Value;
use std::{
    fmt::{self, Debug, Formatter},
    os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
};

/// An owning collection of file descriptors which arrived together, typically as the ancillary
/// data of one received message.
///
/// Every entry is either *live*, in which case the set closes it when [closed](Self::close) or
/// dropped, or *stolen*, in which case ownership was handed out by [`steal()`](Self::steal) and the
/// set no longer touches it. Stolen entries keep their slot, so indices stay stable and
/// [`len()`](Self::len) does not change when stealing.
///
/// Descriptors obtained through [`get()`](Self::get) or [`borrow()`](Self::borrow) remain owned by
/// the set and must not be closed by the caller.
///
/// # Example
/// ```
#[doc = doctest_file::include_doctest!("demos/pass_fd.rs")]
/// ```
#[derive(Default)]
pub struct FdSet {
    fds: Vec<Option<OwnedFd>>,
    closed: bool,
}
impl FdSet {
    /// Creates an empty set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set which takes ownership of the given raw descriptors.
    ///
    /// All values are validated before any is adopted: if one of them is negative,
    /// [`Error::InvalidDescriptor`] is returned and ownership of every value stays with the
    /// caller.
    ///
    /// # Safety
    /// Every value must be an open file descriptor which is not owned by anything else.
    pub unsafe fn from_list(values: impl IntoIterator<Item = RawFd>) -> Result<Self> {
        let values: Vec<RawFd> = values.into_iter().collect();
        if let Some(bad) = values.iter().find(|&&fd| fd < 0) {
            return Err(Error::InvalidDescriptor(bad.to_string()));
        }
        let fds = values
            .into_iter()
            .map(|fd| {
                Some(unsafe {
                    // SAFETY: as per safety contract, and checked to be non-negative
                    OwnedFd::from_raw_fd(fd)
                })
            })
            .collect();
        Ok(Self { fds, closed: false })
    }

    /// Creates a set from a JSON array of descriptor numbers, as found in payloads which refer to
    /// descriptors by value.
    ///
    /// Anything but an array of integers in the range of [`RawFd`] that are not negative is
    /// rejected with [`Error::InvalidDescriptor`] before any descriptor is adopted.
    ///
    /// # Safety
    /// Same as [`from_list()`](Self::from_list).
    pub unsafe fn from_json(value: &Value) -> Result<Self> {
        let Value::Array(elements) = value else {
            return Err(Error::InvalidDescriptor(value.to_string()));
        };
        let values = elements
            .iter()
            .map(|v| {
                v.as_i64()
                    .and_then(|n| RawFd::try_from(n).ok())
                    .ok_or_else(|| Error::InvalidDescriptor(v.to_string()))
            })
            .collect::<Result<Vec<RawFd>>>()?;
        unsafe {
            // SAFETY: as per safety contract
            Self::from_list(values)
        }
    }

    /// Returns the number of entries, stolen ones included. A closed set has no entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.fds.len()
    }
    /// Returns `true` if there are no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }
    /// Returns `true` once [`close()`](Self::close) was called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn entry(&self, index: usize) -> Result<&OwnedFd> {
        if self.closed {
            return Err(Error::Closed);
        }
        match self.fds.get(index) {
            None => Err(Error::OutOfRange {
                index,
                len: self.len(),
            }),
            Some(None) => Err(Error::Stolen(index)),
            Some(Some(fd)) => Ok(fd),
        }
    }

    /// Returns the raw value of the descriptor at `index` without transferring ownership.
    ///
    /// # Errors
    /// - [`Error::OutOfRange`] if `index` is not below [`len()`](Self::len)
    /// - [`Error::Stolen`] if the entry was stolen
    /// - [`Error::Closed`] if the set was closed
    #[inline]
    pub fn get(&self, index: usize) -> Result<RawFd> {
        self.entry(index).map(AsRawFd::as_raw_fd)
    }
    /// Borrows the descriptor at `index`. Fails the same way as [`get()`](Self::get).
    #[inline]
    pub fn borrow(&self, index: usize) -> Result<BorrowedFd<'_>> {
        use std::os::fd::AsFd;
        self.entry(index).map(AsFd::as_fd)
    }

    /// Transfers ownership of the descriptor at `index` to the caller. The set will never close it.
    ///
    /// # Errors
    /// Same as [`get()`](Self::get); in particular, stealing the same index twice fails with
    /// [`Error::Stolen`].
    pub fn steal(&mut self, index: usize) -> Result<OwnedFd> {
        self.entry(index)?;
        self.fds
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(Error::Stolen(index))
    }

    /// Removes the last entry, live or stolen, handing out the descriptor if it was live.
    pub(crate) fn pop(&mut self) -> Option<OwnedFd> {
        self.fds.pop().flatten()
    }

    /// Closes every live descriptor. Calling this again, or on a set whose entries were all
    /// stolen, does nothing.
    pub fn close(&mut self) {
        let live = self.fds.iter().flatten().count();
        if live != 0 {
            log::trace!("closing {live} descriptors");
        }
        self.fds.clear();
        self.closed = true;
    }
}

impl FromIterator<OwnedFd> for FdSet {
    fn from_iter<I: IntoIterator<Item = OwnedFd>>(iter: I) -> Self {
        Self {
            fds: iter.into_iter().map(Some).collect(),
            closed: false,
        }
    }
}
impl From<Vec<OwnedFd>> for FdSet {
    #[inline]
    fn from(fds: Vec<OwnedFd>) -> Self {
        fds.into_iter().collect()
    }
}

impl Debug for FdSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        struct Entry<'a>(&'a Option<OwnedFd>);
        impl Debug for Entry<'_> {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                match self.0 {
                    Some(fd) => Debug::fmt(&fd.as_raw_fd(), f),
                    None => f.write_str("stolen"),
                }
            }
        }
        f.debug_struct("FdSet")
            .field("fds", &self.fds.iter().map(Entry).collect::<Vec<_>>())
            .field("closed", &self.closed)
            .finish()
    }
}
