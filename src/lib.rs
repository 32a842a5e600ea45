#![doc = include_str!("../README.md")]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]
// If this was in Cargo.toml, it would cover demos and tests as well
#![warn(
    missing_docs,
    clippy::panic_in_result_fn,
    clippy::missing_assert_message,
    clippy::arithmetic_side_effects
)]

#[cfg(not(unix))]
compile_error!("jsoncomm relies on Unix domain sockets and only builds for Unix-like targets");

#[macro_use]
mod macros;

mod address;
mod c_wrappers;
mod cmsg;
mod error;
mod fdset;
mod socket;

pub use {
    address::{Address, MAX_ADDRESS_LEN},
    cmsg::MAX_FDS_PER_MESSAGE,
    error::{Error, Result},
    fdset::FdSet,
    socket::{Message, Role, Socket, SocketOptions},
};

/// Readiness-driven wrapper for use inside a Tokio runtime.
#[cfg(feature = "tokio")]
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "tokio")))]
pub mod tokio;
