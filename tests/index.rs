#[path = "util/mod.rs"]
#[macro_use]
mod util;

mod fdset;
#[cfg(feature = "tokio")]
mod tokio_socket;
