//! TUN/TAP device allocation for Linux.
//!
//! This crate does one thing: it opens the kernel's virtual-interface
//! control node, negotiates an interface name and mode with a single
//! `TUNSETIFF` exchange, and hands back a duplex handle bound to the
//! resulting interface together with the name the kernel actually
//! assigned.
//!
//! TUN devices carry raw IP packets (Layer 3); TAP devices carry raw
//! Ethernet frames (Layer 2). With the default flags there is no
//! packet-info prefix on the stream: one read is one packet/frame.
//!
//! Address assignment, routing, and packet processing are deliberately
//! left to the caller.
//!
//! # Example
//!
//! ```ignore
//! use tunalloc::{Mode, TunTap};
//!
//! // Let the kernel pick a name (tun0, tun1, ...)
//! let tun = TunTap::open("", Mode::Tun)?;
//! println!("allocated {}", tun.name());
//!
//! // Or ask for a specific persistent TAP device
//! let tap = TunTap::builder()
//!     .name("mytap0")
//!     .mode(Mode::Tap)
//!     .persistent(true)
//!     .create()?;
//! ```
//!
//! # Async Support
//!
//! The descriptor is opened nonblocking, so synchronous reads and writes
//! can return [`WouldBlock`](std::io::ErrorKind::WouldBlock). Enable the
//! `async` feature for tokio-driven I/O:
//!
//! ```ignore
//! use tunalloc::{Mode, TunTap};
//!
//! let tun = TunTap::builder().mode(Mode::Tun).create_async()?;
//!
//! let mut buf = [0u8; 1504];
//! let n = tun.recv(&mut buf).await?;
//! tun.send(&buf[..n]).await?;
//! ```

#[cfg(feature = "async")]
mod async_device;
mod device;
mod error;

#[cfg(feature = "async")]
pub use async_device::AsyncTunTap;
pub use device::{Mode, TunTap, TunTapBuilder, TunTapFlags, TunTapInfo, list_devices};
pub use error::{Error, Result};

/// The path to the TUN/TAP control node.
pub const TUN_DEVICE_PATH: &str = "/dev/net/tun";
