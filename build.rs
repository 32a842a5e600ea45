use std::{
    env::{var as env_var, var_os as env_var_os},
    io::{self, Write},
};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    if is_unix() {
        let target = TargetTriplet::fetch();
        collect_platform_features(&target);
    }
}

fn is_unix() -> bool {
    env_var_os("CARGO_CFG_UNIX").is_some()
}

/// This can define the following:
/// - `jsoncomm_abstract_ns`: the abstract socket namespace exists, which also makes autobinding
///   of client sockets possible
/// - `jsoncomm_memfd`: `memfd_create` and file sealing are available for oversized payloads
/// - `jsoncomm_peek_trunc`: `recv` with `MSG_PEEK | MSG_TRUNC` reports the real datagram length
///   and `recvmsg` understands `MSG_CMSG_CLOEXEC`
#[rustfmt::skip]
fn collect_platform_features(target: &TargetTriplet) {
    if target.os_any(&["linux", "android"]) {
        ldefine(&["jsoncomm_abstract_ns", "jsoncomm_peek_trunc"]);
    }
    // uClibc lacks memfd_create in the libc crate
    if target.os_any(&["linux"]) && !target.env("uclibc") {
        define("jsoncomm_memfd");
    }
}

fn define(cfg: &str) {
    ldefine(&[cfg]);
}
fn ldefine(cfgs: &[&str]) {
    let stdout_ = io::stdout();
    let mut stdout = stdout_.lock();
    for i in cfgs {
        let _ = writeln!(stdout, "cargo:rustc-cfg={i}");
    }
}

struct TargetTriplet {
    os: String,
    env: Option<String>,
}
#[rustfmt::skip]
impl TargetTriplet {
    fn fetch() -> Self {
        Self {
            os: env_var("CARGO_CFG_TARGET_OS").unwrap_or_default(),
            env: env_var("CARGO_CFG_TARGET_ENV").ok(),
        }
    }
    fn os_any(&self, oses: &[&str]) -> bool { oses.iter().copied().any(|x| x == self.os) }
    fn env(&self, env: &str) -> bool { self.env.as_deref() == Some(env) }
}
