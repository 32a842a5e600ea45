use crate::util::*;
use color_eyre::eyre::WrapErr;
use jsoncomm::{Error, FdSet};
use serde_json::json;
use std::{
    fs::File,
    io::Read,
    os::fd::{FromRawFd, IntoRawFd, RawFd},
};

fn duplicates(file: &File, count: usize) -> TestResult<Vec<RawFd>> {
    (0..count)
        .map(|_| -> TestResult<RawFd> { Ok(file.try_clone().context("dup failed")?.into_raw_fd()) })
        .collect()
}

#[test]
fn indexing() -> TestResult {
    testinit();
    let source = file_with("indexing")?;
    let raw = duplicates(&source, 4)?;
    let set = unsafe { FdSet::from_list(raw.iter().copied()) }?;

    ensure_eq!(set.len(), 4);
    for (i, &fd) in raw.iter().enumerate() {
        ensure_eq!(set.get(i)?, fd);
    }
    ensure_matches!(set.get(128), Err(Error::OutOfRange { index: 128, len: 4 }));
    Ok(())
}

#[test]
fn close_releases_descriptors() -> TestResult {
    testinit();
    let (read_end, write_end) = {
        let mut fds = [-1; 2];
        let success = unsafe { libc::pipe(fds.as_mut_ptr()) } != -1;
        color_eyre::eyre::ensure!(success, "pipe creation failed: {}", std::io::Error::last_os_error());
        unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) }
    };
    let mut set = unsafe { FdSet::from_list(duplicates(&write_end, 3)?) }?;
    drop(write_end);

    set.close();
    // EOF only shows up once every copy of the write end is gone
    let mut rest = Vec::new();
    (&read_end).read_to_end(&mut rest)?;
    ensure_eq!(rest.len(), 0);

    set.close();
    ensure_eq!(set.len(), 0);
    ensure_matches!(set.get(0), Err(Error::Closed));
    Ok(())
}

#[test]
fn validation() -> TestResult {
    testinit();
    let empty = unsafe { FdSet::from_list(Vec::<RawFd>::new()) }?;
    ensure_eq!(empty.len(), 0);

    let e = unsafe { FdSet::from_list([-1]) }.unwrap_err();
    ensure_matches!(e, Error::InvalidDescriptor(..));
    color_eyre::eyre::ensure!(e.is_programming_error(), "validation failures are caller bugs");

    let e = unsafe { FdSet::from_json(&json!(["foobar"])) }.unwrap_err();
    ensure_matches!(e, Error::InvalidDescriptor(v) if v == "\"foobar\"");
    Ok(())
}

#[test]
fn stolen_descriptor_outlives_set() -> TestResult {
    testinit();
    let source = file_with("foobar")?;
    let mut set = unsafe { FdSet::from_list(duplicates(&source, 2)?) }?;
    drop(source);

    let mut stolen = File::from(set.steal(1)?);
    ensure_matches!(set.steal(1), Err(Error::Stolen(1)));
    ensure_eq!(set.len(), 2);
    drop(set);

    ensure_eq!(read_all(&mut stolen)?, "foobar");
    Ok(())
}
