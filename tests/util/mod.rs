//! Test utilities for setting up a server in a scratch directory and talking to it.
#![allow(dead_code, unused_macros)]

#[macro_use]
mod eyre;

pub use eyre::*;

use {
    color_eyre::eyre::WrapErr,
    jsoncomm::Socket,
    std::{
        fs::File,
        io::{prelude::*, SeekFrom},
        path::PathBuf,
    },
    tempfile::TempDir,
};

pub fn testinit() {
    eyre::install();
}

/// A server socket bound inside a fresh temporary directory.
pub struct Fixture {
    // Declared first so that it unlinks its socket file before the directory is removed
    pub server: Socket,
    pub path: PathBuf,
    pub dir: TempDir,
}
impl Fixture {
    pub fn new() -> TestResult<Self> {
        testinit();
        let dir = tempfile::tempdir().context("temporary directory creation failed")?;
        let path = dir.path().join("server.sock");
        let server = Socket::new_server(&path).context("server creation failed")?;
        Ok(Self { server, path, dir })
    }
    pub fn client(&self) -> TestResult<Socket> {
        Socket::new_client(self.path.as_path()).context("client creation failed")
    }
}

/// An unnamed temporary file holding `contents`.
pub fn file_with(contents: &str) -> TestResult<File> {
    let mut file = tempfile::tempfile().context("temporary file creation failed")?;
    file.write_all(contents.as_bytes())?;
    Ok(file)
}

/// Reads a file from the start, regardless of where its shared offset currently is.
pub fn read_all(file: &mut File) -> TestResult<String> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut contents)?;
    Ok(contents)
}
