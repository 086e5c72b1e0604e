//! Async TUN/TAP support (feature `async`).
//!
//! The device descriptor is already nonblocking, so it slots straight
//! into tokio's [`AsyncFd`]: wait for readiness, attempt the syscall,
//! retry on a spurious wakeup.

use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::task::{Context, Poll};

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use crate::device::{Mode, TunTap, TunTapBuilder};
use crate::error::Result;

/// An async TUN/TAP device handle.
///
/// Wraps an allocated [`TunTap`] in tokio's readiness machinery. One
/// [`recv`](Self::recv) yields one raw packet/frame; one
/// [`send`](Self::send) injects one.
pub struct AsyncTunTap {
    fd: AsyncFd<TunTap>,
}

impl AsyncTunTap {
    /// Register an allocated device with the tokio reactor.
    pub fn new(device: TunTap) -> Result<Self> {
        Ok(Self {
            fd: AsyncFd::new(device)?,
        })
    }

    /// Get the resolved device name.
    pub fn name(&self) -> &str {
        self.fd.get_ref().name()
    }

    /// Get the device mode.
    pub fn mode(&self) -> Mode {
        self.fd.get_ref().mode()
    }

    /// Receive one packet/frame.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let mut guard = self.fd.ready(Interest::READABLE).await?;

            match guard.try_io(|inner| inner.get_ref().file().read(buf)) {
                Ok(result) => return Ok(result?),
                Err(_would_block) => continue,
            }
        }
    }

    /// Send one packet/frame.
    pub async fn send(&self, buf: &[u8]) -> Result<usize> {
        loop {
            let mut guard = self.fd.ready(Interest::WRITABLE).await?;

            match guard.try_io(|inner| inner.get_ref().file().write(buf)) {
                Ok(result) => return Ok(result?),
                Err(_would_block) => continue,
            }
        }
    }

    /// Poll for an incoming packet/frame.
    ///
    /// Poll-based version of [`recv`](Self::recv) for `Stream`-style
    /// consumers.
    pub fn poll_recv(&self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<Result<usize>> {
        loop {
            let mut guard = match self.fd.poll_read_ready(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e.into())),
                Poll::Pending => return Poll::Pending,
            };

            match guard.try_io(|inner| inner.get_ref().file().read(buf)) {
                Ok(result) => return Poll::Ready(result.map_err(Into::into)),
                Err(_would_block) => continue,
            }
        }
    }

    /// Unwrap back into the synchronous handle.
    pub fn into_inner(self) -> TunTap {
        self.fd.into_inner()
    }
}

impl AsRawFd for AsyncTunTap {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

impl std::fmt::Debug for AsyncTunTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTunTap")
            .field("name", &self.name())
            .field("mode", &self.mode())
            .finish()
    }
}

impl TunTapBuilder {
    /// Allocate the device and register it with the tokio reactor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create_async(self) -> Result<AsyncTunTap> {
        AsyncTunTap::new(self.create()?)
    }
}
