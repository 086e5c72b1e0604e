//! Error types for TUN/TAP allocation.

use std::io;

/// Result type for TUN/TAP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while allocating or managing a TUN/TAP device.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The control node `/dev/net/tun` could not be opened.
    ///
    /// Missing node (tun module not loaded), permission denied, or
    /// descriptor exhaustion all land here. Nothing was allocated.
    #[error("cannot open /dev/net/tun: {0}")]
    ControlNode(#[source] io::Error),

    /// The kernel rejected the TUNSETIFF request.
    ///
    /// Bad name, a name already bound to an incompatible interface,
    /// insufficient privilege, or resource limits. The descriptor opened
    /// for the attempt has been closed; no interface was left behind.
    #[error("allocation failed for device {name}: {source}")]
    Allocate {
        /// The requested device name (empty for kernel auto-naming).
        name: String,
        /// The underlying error.
        source: io::Error,
    },

    /// Device name too long (max 15 bytes).
    #[error("device name too long: {name} ({len} > 15 bytes)")]
    NameTooLong {
        /// The name that was too long.
        name: String,
        /// The length of the name in bytes.
        len: usize,
    },

    /// Invalid device name.
    #[error("invalid device name: {0}")]
    InvalidName(String),

    /// No mode specified (must be TUN or TAP).
    #[error("no mode specified (must be tun or tap)")]
    NoModeSpecified,

    /// User not found.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Group not found.
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// An ioctl on an already-allocated device failed.
    #[error("ioctl {name} failed: {source}")]
    Ioctl {
        /// The ioctl name.
        name: &'static str,
        /// The underlying error.
        source: io::Error,
    },
}

impl Error {
    /// Create an allocation error for the given requested name.
    pub(crate) fn allocate(name: &str, source: io::Error) -> Self {
        Error::Allocate {
            name: name.to_string(),
            source,
        }
    }

    /// Create an ioctl error.
    pub(crate) fn ioctl(name: &'static str, source: io::Error) -> Self {
        Error::Ioctl { name, source }
    }
}
