//! Pseudo-serial logger: expose each instrument stream as a pseudo-terminal
//!
//! Every configured device gets a freshly allocated pty pair. Payloads are
//! written to the primary side; programs that expect a real serial port open
//! the secondary path reported by [`PseudoSerialLogger::secondary_paths`], or
//! the optional alias symlink named after the device (`imag_0`, `spec_2`, ...).

use std::collections::{BTreeMap, HashMap};
use std::ffi::CStr;
use std::fs::File;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::file_logger::check_loggable;
use super::write_lane::{RoutedWriter, Sink};
use crate::processor::Processor;
use crate::types::{DeviceId, Packet};
use crate::{GseError, Result};

struct PtyPair {
    primary: OwnedFd,
    secondary: OwnedFd,
    path: PathBuf,
}

fn last_pty_error() -> GseError {
    GseError::Pty { source: std::io::Error::last_os_error() }
}

fn open_pty() -> Result<PtyPair> {
    let mut primary: libc::c_int = -1;
    let mut secondary: libc::c_int = -1;

    // SAFETY: openpty only writes the two descriptors; the optional name,
    // termios and winsize arguments are null.
    let rc = unsafe {
        libc::openpty(
            &mut primary,
            &mut secondary,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
    if rc != 0 {
        return Err(last_pty_error());
    }

    // SAFETY: both descriptors were just returned by openpty and are owned here.
    let (primary, secondary) = unsafe { (OwnedFd::from_raw_fd(primary), OwnedFd::from_raw_fd(secondary)) };

    let path = tty_name(secondary.as_raw_fd())?;
    make_raw(secondary.as_raw_fd())?;
    set_nonblocking(primary.as_raw_fd())?;

    Ok(PtyPair { primary, secondary, path })
}

fn tty_name(fd: RawFd) -> Result<PathBuf> {
    let mut buf: [libc::c_char; 256] = [0; 256];
    // SAFETY: buf is writable for its full length and ttyname_r NUL-terminates on success.
    let rc = unsafe { libc::ttyname_r(fd, buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return Err(GseError::Pty { source: std::io::Error::from_raw_os_error(rc) });
    }
    // SAFETY: ttyname_r succeeded, so buf holds a NUL-terminated string.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(PathBuf::from(name.to_string_lossy().into_owned()))
}

/// Put the line discipline in raw mode so binary payloads pass unmodified.
fn make_raw(fd: RawFd) -> Result<()> {
    // SAFETY: termios is plain data; tcgetattr fills it before use.
    unsafe {
        let mut termios: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut termios) != 0 {
            return Err(last_pty_error());
        }
        libc::cfmakeraw(&mut termios);
        if libc::tcsetattr(fd, libc::TCSANOW, &termios) != 0 {
            return Err(last_pty_error());
        }
    }
    Ok(())
}

/// Writes to a primary nobody reads fail instead of stalling the lane.
fn set_nonblocking(fd: RawFd) -> Result<()> {
    // SAFETY: fcntl on a descriptor we own.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(last_pty_error());
        }
    }
    Ok(())
}

/// Logger whose per-device sinks are pseudo-terminal primaries.
pub struct PseudoSerialLogger {
    writer: RoutedWriter,
    secondary_paths: BTreeMap<DeviceId, PathBuf>,
    aliases: Vec<PathBuf>,
    // Held open so the line stays up between external readers
    _secondaries: Vec<OwnedFd>,
}

impl PseudoSerialLogger {
    /// Allocate one pty pair per device.
    ///
    /// When `alias_dir` is given, a symlink named after each device's file
    /// stem is created there, pointing at the secondary path.
    pub fn new(devices: impl IntoIterator<Item = DeviceId>, alias_dir: Option<&Path>) -> Result<Self> {
        let mut devices: Vec<DeviceId> = devices.into_iter().collect();
        devices.sort();
        devices.dedup();
        check_loggable(devices.iter().copied())?;

        let mut sinks: HashMap<DeviceId, Sink> = HashMap::new();
        let mut secondary_paths = BTreeMap::new();
        let mut secondaries = Vec::new();

        for device in &devices {
            let pair = open_pty()?;
            debug!("Allocated {} for {}", pair.path.display(), device);
            sinks.insert(*device, Box::new(File::from(pair.primary)));
            secondary_paths.insert(*device, pair.path);
            secondaries.push(pair.secondary);
        }

        let mut logger = Self {
            writer: RoutedWriter::new("pseudo serial", sinks),
            secondary_paths,
            aliases: Vec::new(),
            _secondaries: secondaries,
        };
        if let Some(dir) = alias_dir {
            logger.create_aliases(dir)?;
        }
        Ok(logger)
    }

    /// Allocate pty pairs for every known imager and spectrometer.
    pub fn all_devices(alias_dir: Option<&Path>) -> Result<Self> {
        Self::new(DeviceId::loggable(), alias_dir)
    }

    fn create_aliases(&mut self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| GseError::file_error(dir.to_path_buf(), e))?;
        for (device, target) in &self.secondary_paths {
            let link = dir.join(device.file_stem());
            match std::fs::symlink_metadata(&link) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    std::fs::remove_file(&link).map_err(|e| GseError::file_error(link.clone(), e))?;
                }
                Ok(_) => {
                    return Err(GseError::file_error(
                        link,
                        std::io::Error::new(std::io::ErrorKind::AlreadyExists, "alias path is not a symlink"),
                    ));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(GseError::file_error(link, e)),
            }
            std::os::unix::fs::symlink(target, &link).map_err(|e| GseError::file_error(link.clone(), e))?;
            self.aliases.push(link);
        }
        Ok(())
    }

    fn remove_aliases(&mut self) {
        for link in self.aliases.drain(..) {
            if let Err(e) = std::fs::remove_file(&link) {
                warn!("Failed to remove alias {}: {}", link.display(), e);
            }
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.writer.set_drain_timeout(drain_timeout);
        self
    }

    /// Secondary device path per configured device.
    pub fn secondary_paths(&self) -> &BTreeMap<DeviceId, PathBuf> {
        &self.secondary_paths
    }

    /// Alias symlinks created for this logger.
    pub fn aliases(&self) -> &[PathBuf] {
        &self.aliases
    }
}

impl std::fmt::Debug for PseudoSerialLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PseudoSerialLogger")
            .field("secondary_paths", &self.secondary_paths)
            .field("aliases", &self.aliases)
            .finish()
    }
}

#[async_trait]
impl Processor for PseudoSerialLogger {
    fn name(&self) -> &str {
        "pseudo_serial"
    }

    async fn setup(&mut self, _transport: Arc<UdpSocket>) -> Result<()> {
        for (device, path) in &self.secondary_paths {
            info!("{} available at {}", device, path.display());
        }
        self.writer.start();
        Ok(())
    }

    fn receive(&mut self, packet: &Packet) -> Result<()> {
        self.writer.route(packet);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.close().await;
        self.remove_aliases();
        Ok(())
    }
}

impl Drop for PseudoSerialLogger {
    fn drop(&mut self) {
        self.remove_aliases();
    }
}
