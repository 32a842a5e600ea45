use std::{
    fs::{remove_file, symlink_metadata},
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};

/// Removes a server's socket file once the server is done with it.
///
/// The identity of the file is recorded when the guard is created, and a file found at the path
/// later is only removed if it is still the same one. A socket file which was replaced in the
/// meantime belongs to someone else.
#[derive(Debug)]
pub(super) struct PathDropGuard {
    path: Option<PathBuf>,
    identity: Option<(u64, u64)>,
}
impl PathDropGuard {
    pub fn dummy() -> Self {
        Self {
            path: None,
            identity: None,
        }
    }
    /// Takes charge of `path`, which must have just been created by a successful `bind`.
    pub fn new(path: PathBuf) -> Self {
        let identity = match identify(&path) {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("failed to stat socket file {}: {e}", path.display());
                None
            }
        };
        Self {
            path: Some(path),
            identity,
        }
    }
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
    pub fn unlink(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        if let (Some(ours), Ok(current)) = (self.identity, identify(&path)) {
            if ours != current {
                log::debug!(
                    "socket file {} was replaced, leaving it in place",
                    path.display()
                );
                return;
            }
        }
        match remove_file(&path) {
            Ok(()) => log::debug!("unlinked socket file {}", path.display()),
            Err(e) => log::warn!("failed to unlink socket file {}: {e}", path.display()),
        }
    }
}
impl Drop for PathDropGuard {
    fn drop(&mut self) {
        self.unlink();
    }
}

fn identify(path: &Path) -> std::io::Result<(u64, u64)> {
    let meta = symlink_metadata(path)?;
    Ok((meta.dev(), meta.ino()))
}
