//! TUN/TAP device allocation and the resulting device handle.
//!
//! The entire negotiation with the kernel is one `open(2)` of the control
//! node followed by one `TUNSETIFF` ioctl. The same fixed-size `ifr_name`
//! buffer carries the requested name in and the resolved name back out.

use crate::TUN_DEVICE_PATH;
use crate::error::{Error, Result};

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use tracing::debug;

// TUN/TAP ioctls (from linux/if_tun.h)
const TUNSETIFF: libc::c_ulong = 0x400454ca;
const TUNSETPERSIST: libc::c_ulong = 0x400454cb;
const TUNSETOWNER: libc::c_ulong = 0x400454cc;
const TUNSETGROUP: libc::c_ulong = 0x400454ce;

// TUNSETIFF flag bits (from linux/if_tun.h)
/// TUN device (Layer 3).
const IFF_TUN: libc::c_short = 0x0001;
/// TAP device (Layer 2).
const IFF_TAP: libc::c_short = 0x0002;
/// Multi-queue support.
const IFF_MULTI_QUEUE: libc::c_short = 0x0100;
/// No packet-info header on the data stream.
const IFF_NO_PI: libc::c_short = 0x1000;
/// Single queue (legacy flow-control behavior).
const IFF_ONE_QUEUE: libc::c_short = 0x2000;
/// Virtio-style VNET header support.
const IFF_VNET_HDR: libc::c_short = 0x4000;

/// Device mode (TUN or TAP).
///
/// Fixed at allocation time for the lifetime of the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// TUN device - operates at Layer 3 (IP packets).
    Tun,
    /// TAP device - operates at Layer 2 (Ethernet frames).
    Tap,
}

impl Mode {
    /// Get the TUNSETIFF flag bit for this mode.
    fn flag(&self) -> libc::c_short {
        match self {
            Mode::Tun => IFF_TUN,
            Mode::Tap => IFF_TAP,
        }
    }

    /// Get the mode name.
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Tun => "tun",
            Mode::Tap => "tap",
        }
    }

    /// Whether this is the Ethernet-frame (TAP) mode.
    pub fn is_tap(&self) -> bool {
        matches!(self, Mode::Tap)
    }
}

/// Additional TUNSETIFF flag bits beyond the mode itself.
#[derive(Debug, Clone, Copy)]
pub struct TunTapFlags {
    /// Don't prefix packets with a protocol-info header.
    pub no_pi: bool,
    /// Use a single queue (legacy behavior).
    pub one_queue: bool,
    /// Enable the VNET header for virtio compatibility.
    pub vnet_hdr: bool,
    /// Enable multi-queue support.
    pub multi_queue: bool,
}

impl Default for TunTapFlags {
    /// `no_pi` defaults to on: reads and writes carry raw packet/frame
    /// bytes with no out-of-band metadata prefix.
    fn default() -> Self {
        Self {
            no_pi: true,
            one_queue: false,
            vnet_hdr: false,
            multi_queue: false,
        }
    }
}

impl TunTapFlags {
    /// Combine into the TUNSETIFF flags word (without the mode bit).
    fn as_flags(&self) -> libc::c_short {
        let mut flags: libc::c_short = 0;
        if self.no_pi {
            flags |= IFF_NO_PI;
        }
        if self.one_queue {
            flags |= IFF_ONE_QUEUE;
        }
        if self.vnet_hdr {
            flags |= IFF_VNET_HDR;
        }
        if self.multi_queue {
            flags |= IFF_MULTI_QUEUE;
        }
        flags
    }
}

/// Validate a requested device name.
///
/// Empty is valid (kernel auto-naming). Names must fit the kernel's
/// fixed 16-byte field including the terminator, and must not contain
/// NUL bytes, which would silently truncate inside the kernel.
fn validate_name(name: &str) -> Result<()> {
    if name.len() > libc::IFNAMSIZ - 1 {
        return Err(Error::NameTooLong {
            name: name.to_string(),
            len: name.len(),
        });
    }
    if name.contains('\0') {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Open the control node and bind a descriptor to an interface.
///
/// This is the whole allocation protocol: one open, one ioctl, and the
/// resolved name read back from the same `ifr_name` buffer the request
/// went out in. The descriptor is owned by the returned `File`, so any
/// failure after the open closes it on the way out.
fn allocate(name: &str, flags: libc::c_short) -> Result<(File, String)> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_DSYNC)
        .open(TUN_DEVICE_PATH)
        .map_err(Error::ControlNode)?;

    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    ifr.ifr_ifru.ifru_flags = flags;

    // An all-zero name field asks the kernel to pick one (tun0, tap0, ...).
    for (dst, src) in ifr.ifr_name.iter_mut().zip(name.as_bytes()) {
        *dst = *src as libc::c_char;
    }

    let ret = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF, &ifr) };
    if ret < 0 {
        return Err(Error::allocate(name, io::Error::last_os_error()));
    }

    // The kernel wrote the resolved name back, null-terminated within
    // the 16-byte field.
    let resolved: Vec<u8> = ifr
        .ifr_name
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    let resolved = String::from_utf8_lossy(&resolved).into_owned();

    Ok((file, resolved))
}

/// Builder for allocating TUN/TAP devices.
#[derive(Debug, Clone)]
pub struct TunTapBuilder {
    name: Option<String>,
    mode: Option<Mode>,
    owner: Option<u32>,
    group: Option<u32>,
    persistent: bool,
    flags: TunTapFlags,
}

impl TunTapBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            name: None,
            mode: None,
            owner: None,
            group: None,
            persistent: false,
            flags: TunTapFlags::default(),
        }
    }

    /// Set the device name.
    ///
    /// If not specified (or empty), the kernel assigns a name
    /// (tun0, tap0, ...).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the device mode (TUN or TAP).
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the owner UID of the device.
    pub fn owner(mut self, uid: u32) -> Self {
        self.owner = Some(uid);
        self
    }

    /// Set the owner by username.
    pub fn owner_name(mut self, name: &str) -> Result<Self> {
        self.owner = Some(lookup_user(name)?);
        Ok(self)
    }

    /// Set the group GID of the device.
    pub fn group(mut self, gid: u32) -> Self {
        self.group = Some(gid);
        self
    }

    /// Set the group by name.
    pub fn group_name(mut self, name: &str) -> Result<Self> {
        self.group = Some(lookup_group(name)?);
        Ok(self)
    }

    /// Make the device persistent (it survives the handle's close).
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Don't prefix packets with a protocol-info header (default on).
    pub fn no_pi(mut self, value: bool) -> Self {
        self.flags.no_pi = value;
        self
    }

    /// Use a single queue (legacy behavior).
    pub fn one_queue(mut self, value: bool) -> Self {
        self.flags.one_queue = value;
        self
    }

    /// Enable the VNET header for virtio compatibility.
    pub fn vnet_hdr(mut self, value: bool) -> Self {
        self.flags.vnet_hdr = value;
        self
    }

    /// Enable multi-queue support.
    pub fn multi_queue(mut self, value: bool) -> Self {
        self.flags.multi_queue = value;
        self
    }

    /// Set all extra flags at once.
    pub fn flags(mut self, flags: TunTapFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Allocate the device.
    ///
    /// Opens `/dev/net/tun` read/write in nonblocking, synchronous-write
    /// mode and issues `TUNSETIFF`. On success the returned handle owns
    /// the descriptor and carries the name the kernel actually assigned.
    /// On any failure the descriptor is closed before the error returns.
    pub fn create(self) -> Result<TunTap> {
        let mode = self.mode.ok_or(Error::NoModeSpecified)?;

        let requested = self.name.as_deref().unwrap_or("");
        validate_name(requested)?;

        let (file, name) = allocate(requested, mode.flag() | self.flags.as_flags())?;

        let fd = file.as_raw_fd();

        if let Some(uid) = self.owner {
            let ret = unsafe { libc::ioctl(fd, TUNSETOWNER, uid as libc::c_ulong) };
            if ret < 0 {
                return Err(Error::ioctl("TUNSETOWNER", io::Error::last_os_error()));
            }
        }

        if let Some(gid) = self.group {
            let ret = unsafe { libc::ioctl(fd, TUNSETGROUP, gid as libc::c_ulong) };
            if ret < 0 {
                return Err(Error::ioctl("TUNSETGROUP", io::Error::last_os_error()));
            }
        }

        if self.persistent {
            let ret = unsafe { libc::ioctl(fd, TUNSETPERSIST, 1 as libc::c_int) };
            if ret < 0 {
                return Err(Error::ioctl("TUNSETPERSIST", io::Error::last_os_error()));
            }
        }

        debug!(name = %name, mode = mode.name(), "allocated device");

        Ok(TunTap {
            file,
            name,
            mode,
            persistent: self.persistent,
        })
    }

    /// Allocate a persistent device and return only its name.
    ///
    /// The handle is dropped immediately; the interface stays behind for
    /// separate management.
    pub fn create_persistent(self) -> Result<String> {
        let device = self.persistent(true).create()?;
        Ok(device.name)
    }
}

impl Default for TunTapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A TUN/TAP device handle.
///
/// A duplex byte-stream endpoint bound to one kernel-side virtual
/// interface. Reads yield one raw IP packet (TUN) or Ethernet frame (TAP)
/// per call; writes inject one packet/frame into the host stack. The
/// descriptor is nonblocking, so reads and writes can return
/// [`io::ErrorKind::WouldBlock`]; pair with readiness polling or the
/// `async` feature.
pub struct TunTap {
    file: File,
    name: String,
    mode: Mode,
    persistent: bool,
}

impl TunTap {
    /// Create a new builder.
    pub fn builder() -> TunTapBuilder {
        TunTapBuilder::new()
    }

    /// Allocate a device in one call.
    ///
    /// An empty `name` requests kernel auto-naming. Equivalent to
    /// `TunTap::builder().name(name).mode(mode).create()`.
    pub fn open(name: &str, mode: Mode) -> Result<Self> {
        Self::builder().name(name).mode(mode).create()
    }

    /// Get the resolved device name.
    ///
    /// Always non-empty, even when the allocation requested auto-naming.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the device mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Check if the device is persistent.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Make the device persistent (or undo it).
    pub fn set_persistent(&mut self, persistent: bool) -> Result<()> {
        let value: libc::c_int = if persistent { 1 } else { 0 };
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), TUNSETPERSIST, value) };
        if ret < 0 {
            return Err(Error::ioctl("TUNSETPERSIST", io::Error::last_os_error()));
        }
        self.persistent = persistent;
        Ok(())
    }

    /// Delete a persistent device, consuming the handle.
    pub fn delete(self) -> Result<()> {
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), TUNSETPERSIST, 0 as libc::c_int) };
        if ret < 0 {
            return Err(Error::ioctl("TUNSETPERSIST", io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Delete a persistent device by name.
    pub fn delete_by_name(name: &str, mode: Mode) -> Result<()> {
        TunTap::open(name, mode)?.delete()
    }

    /// Read one packet/frame from the device.
    pub fn read_packet(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    /// Write one packet/frame to the device.
    pub fn write_packet(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    /// Take ownership of the underlying file.
    pub fn into_file(self) -> File {
        self.file
    }

    /// Get a reference to the underlying file.
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Get a mutable reference to the underlying file.
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

impl std::fmt::Debug for TunTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunTap")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("fd", &self.file.as_raw_fd())
            .finish()
    }
}

impl Read for TunTap {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for TunTap {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl AsRawFd for TunTap {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl IntoRawFd for TunTap {
    fn into_raw_fd(self) -> RawFd {
        self.file.into_raw_fd()
    }
}

impl FromRawFd for TunTap {
    /// Create a handle from a raw file descriptor.
    ///
    /// # Safety
    ///
    /// The descriptor must be a valid, already-configured TUN/TAP device.
    /// Name and mode are unknown and default to empty/`Tun`.
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        TunTap {
            file: unsafe { File::from_raw_fd(fd) },
            name: String::new(),
            mode: Mode::Tun,
            persistent: false,
        }
    }
}

/// Look up a user by name and return the UID.
fn lookup_user(name: &str) -> Result<u32> {
    let name_cstr = CString::new(name).map_err(|_| Error::InvalidName(name.to_string()))?;

    unsafe {
        let pwd = libc::getpwnam(name_cstr.as_ptr());
        if pwd.is_null() {
            return Err(Error::UserNotFound(name.to_string()));
        }
        Ok((*pwd).pw_uid)
    }
}

/// Look up a group by name and return the GID.
fn lookup_group(name: &str) -> Result<u32> {
    let name_cstr = CString::new(name).map_err(|_| Error::InvalidName(name.to_string()))?;

    unsafe {
        let grp = libc::getgrnam(name_cstr.as_ptr());
        if grp.is_null() {
            return Err(Error::GroupNotFound(name.to_string()));
        }
        Ok((*grp).gr_gid)
    }
}

/// List existing TUN/TAP devices.
///
/// Scans `/sys/class/net` for interfaces exposing `tun_flags`.
pub fn list_devices() -> Result<Vec<TunTapInfo>> {
    let mut devices = Vec::new();

    let dir = match std::fs::read_dir("/sys/class/net") {
        Ok(d) => d,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(devices),
        Err(e) => return Err(e.into()),
    };

    for entry in dir {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();

        let tun_flags_path = entry.path().join("tun_flags");
        if !tun_flags_path.exists() {
            continue;
        }

        let flags_str = std::fs::read_to_string(&tun_flags_path)?;
        let flags = u32::from_str_radix(flags_str.trim().trim_start_matches("0x"), 16).unwrap_or(0);

        let mode = if flags & (IFF_TUN as u32) != 0 {
            Mode::Tun
        } else if flags & (IFF_TAP as u32) != 0 {
            Mode::Tap
        } else {
            continue;
        };

        let owner = std::fs::read_to_string(entry.path().join("owner"))
            .ok()
            .and_then(|s| s.trim().parse().ok());

        let group = std::fs::read_to_string(entry.path().join("group"))
            .ok()
            .and_then(|s| s.trim().parse().ok());

        devices.push(TunTapInfo {
            name,
            mode,
            owner,
            group,
            flags,
        });
    }

    Ok(devices)
}

/// Information about an existing TUN/TAP device.
#[derive(Debug, Clone)]
pub struct TunTapInfo {
    /// Device name.
    pub name: String,
    /// Device mode.
    pub mode: Mode,
    /// Owner UID, if set.
    pub owner: Option<u32>,
    /// Group GID, if set.
    pub group: Option<u32>,
    /// Raw TUNSETIFF flag bits.
    pub flags: u32,
}

impl TunTapInfo {
    /// Check if the device delivers raw bytes with no packet-info header.
    pub fn no_pi(&self) -> bool {
        self.flags & (IFF_NO_PI as u32) != 0
    }

    /// Check if the device has multi-queue support.
    pub fn multi_queue(&self) -> bool {
        self.flags & (IFF_MULTI_QUEUE as u32) != 0
    }
}
