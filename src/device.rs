//! Linux TUN device provider.
//!
//! Opens `/dev/net/tun`, names the interface and applies addressing and
//! routes through the `ip` tool. Per-app capture has no Linux counterpart
//! here and is logged and ignored.

#![cfg(target_os = "linux")]

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::process::Command;

use tracing::{debug, warn};

use crate::session::{TunnelConfig, TunnelProvider, TunnelReader, TunnelWriter};

const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;

#[repr(C)]
struct IfReq {
    name: [u8; libc::IFNAMSIZ],
    flags: libc::c_short,
    _pad: [u8; 22],
}

/// Provider backed by a kernel TUN interface.
#[derive(Debug, Default)]
pub struct TunProvider;

impl TunnelProvider for TunProvider {
    fn establish(
        &self,
        config: &TunnelConfig,
    ) -> io::Result<(Box<dyn TunnelReader>, Box<dyn TunnelWriter>)> {
        let file = open_tun(&config.name)?;
        configure_interface(config);

        if !config.allowed_apps.is_empty() {
            warn!("per-app capture is not supported on this platform, capturing all routed traffic");
        }

        let reader = file.try_clone()?;
        Ok((Box::new(TunReader(reader)), Box::new(TunWriter(file))))
    }
}

fn open_tun(name: &str) -> io::Result<File> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/net/tun")?;

    // Non-blocking reads let the session observe stop requests.
    let fd = file.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut ifr = IfReq {
        name: [0; libc::IFNAMSIZ],
        flags: IFF_TUN | IFF_NO_PI,
        _pad: [0; 22],
    };
    let bytes = name.as_bytes();
    if bytes.len() >= libc::IFNAMSIZ {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "interface name too long",
        ));
    }
    ifr.name[..bytes.len()].copy_from_slice(bytes);

    let rc = unsafe { libc::ioctl(fd, TUNSETIFF, &mut ifr) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    debug!(name = ?name, "tun device opened");
    Ok(file)
}

/// Bring the interface up and install the routes. Failures are logged but
/// not fatal; the operator may have configured the interface externally.
fn configure_interface(config: &TunnelConfig) {
    let name = &config.name;
    run_ip(&[
        "addr",
        "add",
        &format!("{}/{}", config.address, config.prefix_len),
        "dev",
        name,
    ]);
    run_ip(&["link", "set", "up", "dev", name]);
    for (network, prefix) in &config.routes {
        run_ip(&["route", "add", &format!("{network}/{prefix}"), "dev", name]);
    }
}

fn run_ip(args: &[&str]) {
    match Command::new("ip").args(args).status() {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(?args, %status, "ip command failed"),
        Err(error) => warn!(?args, %error, "failed to run ip"),
    }
}

struct TunReader(File);

impl TunnelReader for TunReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

struct TunWriter(File);

impl TunnelWriter for TunWriter {
    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        self.0.write_all(packet)
    }
}
