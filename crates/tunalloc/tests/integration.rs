//! Integration tests for tunalloc.
//!
//! Allocating a TUN/TAP device needs CAP_NET_ADMIN and a reachable
//! `/dev/net/tun`, so the privileged tests skip themselves gracefully
//! when either is missing.
//!
//! ```bash
//! # Run everything, including the privileged tests
//! sudo cargo test -p tunalloc --test integration
//!
//! # Include the async paths
//! sudo cargo test -p tunalloc --test integration --features async
//! ```

use std::io::Write;

use tunalloc::{Error, Mode, TunTap};

/// Skip the test unless running as root with /dev/net/tun available.
macro_rules! require_tun {
    () => {
        if !is_root() {
            eprintln!("Skipping test: requires root");
            return;
        }
        if !std::path::Path::new(tunalloc::TUN_DEVICE_PATH).exists() {
            eprintln!("Skipping test: /dev/net/tun not present");
            return;
        }
    };
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Number of open descriptors held by this process.
fn open_fd_count() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

/// A name unlikely to collide with anything on the host (max 15 bytes).
fn unique_name(prefix: &str) -> String {
    format!("{}{}", prefix, std::process::id() % 100_000)
}

/// Bring an interface administratively up.
///
/// This is the external collaborator's job, not the library's, so the
/// test does it with a plain SIOCSIFFLAGS exchange.
fn bring_up(name: &str) {
    let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    assert!(sock >= 0, "socket: {}", std::io::Error::last_os_error());

    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    for (dst, src) in ifr.ifr_name.iter_mut().zip(name.as_bytes()) {
        *dst = *src as libc::c_char;
    }
    unsafe {
        ifr.ifr_ifru.ifru_flags = (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
        let ret = libc::ioctl(sock, libc::SIOCSIFFLAGS, &ifr);
        libc::close(sock);
        assert!(ret >= 0, "SIOCSIFFLAGS: {}", std::io::Error::last_os_error());
    }
}

/// A minimal, well-formed IPv4 packet (bare 20-byte header).
fn ipv4_packet() -> Vec<u8> {
    let mut pkt = vec![0u8; 20];
    pkt[0] = 0x45; // version 4, IHL 5
    pkt[3] = 20; // total length
    pkt[8] = 64; // TTL
    pkt[9] = 17; // protocol: UDP
    pkt[12..16].copy_from_slice(&[10, 99, 0, 1]); // src
    pkt[16..20].copy_from_slice(&[10, 99, 0, 2]); // dst
    pkt
}

#[test]
fn kernel_assigned_tun_name() {
    require_tun!();

    let tun = TunTap::open("", Mode::Tun).unwrap();
    assert!(!tun.name().is_empty());
    assert!(tun.name().starts_with("tun"), "got {}", tun.name());
    assert!(tun.name()["tun".len()..].chars().all(|c| c.is_ascii_digit()));
    assert_eq!(tun.mode(), Mode::Tun);
}

#[test]
fn explicit_tap_name_is_honored() {
    require_tun!();

    let name = unique_name("tap-it");
    let tap = TunTap::open(&name, Mode::Tap).unwrap();
    assert_eq!(tap.name(), name);
    assert!(tap.mode().is_tap());
}

#[test]
fn auto_named_taps_are_distinct() {
    require_tun!();

    let first = TunTap::open("", Mode::Tap).unwrap();
    let second = TunTap::open("", Mode::Tap).unwrap();

    assert_ne!(first.name(), second.name());
    assert!(first.name().starts_with("tap"));
    assert!(second.name().starts_with("tap"));
}

#[test]
fn failed_allocation_leaks_no_descriptor() {
    require_tun!();

    let before = open_fd_count();

    // "lo" exists and is not a tun driver device, so TUNSETIFF rejects it.
    let err = TunTap::open("lo", Mode::Tun).unwrap_err();
    assert!(matches!(err, Error::Allocate { .. }), "got {err}");
    let msg = err.to_string();
    assert!(msg.contains("allocation failed for device lo"), "got {msg}");

    assert_eq!(open_fd_count(), before);
}

#[test]
fn allocation_without_privilege_fails_cleanly() {
    if is_root() {
        eprintln!("Skipping test: must run unprivileged");
        return;
    }

    let before = open_fd_count();
    let result = TunTap::open("", Mode::Tun);
    assert!(result.is_err());
    assert_eq!(open_fd_count(), before);
}

#[test]
fn write_after_up_is_accepted() {
    require_tun!();

    let mut tun = TunTap::open("", Mode::Tun).unwrap();
    bring_up(tun.name());

    let pkt = ipv4_packet();
    let n = tun.write(&pkt).unwrap();
    assert_eq!(n, pkt.len());
}

#[test]
fn list_devices_does_not_fail() {
    let devices = tunalloc::list_devices().unwrap();
    // Nothing to assert about contents on an arbitrary host; just make
    // sure the scan holds together.
    for dev in devices {
        assert!(!dev.name.is_empty());
    }
}

#[cfg(feature = "async")]
mod async_io {
    use super::*;

    #[tokio::test]
    async fn async_send_after_up() {
        require_tun!();

        let tun = TunTap::builder().mode(Mode::Tun).create_async().unwrap();
        bring_up(tun.name());

        let pkt = ipv4_packet();
        let n = tun.send(&pkt).await.unwrap();
        assert_eq!(n, pkt.len());
    }

    #[tokio::test]
    async fn async_recv_times_out_on_idle_device() {
        require_tun!();

        let tun = TunTap::builder().mode(Mode::Tun).create_async().unwrap();

        // The device stays down, so nothing can be queued; recv must
        // stay pending rather than spin or error.
        let mut buf = [0u8; 1504];
        let recv = tun.recv(&mut buf);
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(200), recv).await;
        assert!(timed_out.is_err());
    }
}
