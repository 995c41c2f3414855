//! File logger: append instrument payloads to one file per device

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[cfg(unix)]
use std::os::fd::OwnedFd;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::info;

use super::write_lane::{RoutedWriter, Sink};
use crate::processor::Processor;
use crate::types::{DeviceId, Packet};
use crate::{GseError, Result};

/// Where a [`FileLogger`] writes.
#[derive(Debug)]
pub enum LogOutputs {
    /// Directory receiving `imag_<n>.dat` and `spec_<n>.dat` for every known device.
    Root(PathBuf),
    /// Explicit file per device.
    Paths(BTreeMap<DeviceId, PathBuf>),
    /// Already-open descriptors per device.
    #[cfg(unix)]
    Descriptors(BTreeMap<DeviceId, OwnedFd>),
}

impl LogOutputs {
    /// Pick the single output option that was given.
    ///
    /// # Errors
    ///
    /// [`GseError::ConflictingOutputs`] when more than one option is set, and
    /// a configuration error when none is.
    pub fn select(
        root: Option<PathBuf>,
        paths: Option<BTreeMap<DeviceId, PathBuf>>,
        #[cfg(unix)] descriptors: Option<BTreeMap<DeviceId, OwnedFd>>,
    ) -> Result<Self> {
        let mut given = Vec::new();
        if root.is_some() {
            given.push("root");
        }
        if paths.is_some() {
            given.push("paths");
        }
        #[cfg(unix)]
        if descriptors.is_some() {
            given.push("descriptors");
        }
        if given.len() > 1 {
            return Err(GseError::ConflictingOutputs { options: given.join(", ") });
        }

        if let Some(root) = root {
            return Ok(LogOutputs::Root(root));
        }
        if let Some(paths) = paths {
            return Ok(LogOutputs::Paths(paths));
        }
        #[cfg(unix)]
        if let Some(descriptors) = descriptors {
            return Ok(LogOutputs::Descriptors(descriptors));
        }
        Err(GseError::configuration("file logger needs a root directory, path map or descriptor map"))
    }

    fn devices(&self) -> Vec<DeviceId> {
        match self {
            LogOutputs::Root(_) => DeviceId::loggable().collect(),
            LogOutputs::Paths(paths) => paths.keys().copied().collect(),
            #[cfg(unix)]
            LogOutputs::Descriptors(fds) => fds.keys().copied().collect(),
        }
    }
}

/// Reject any id outside the flown imager and spectrometer boards.
pub(crate) fn check_loggable(devices: impl IntoIterator<Item = DeviceId>) -> Result<()> {
    match devices.into_iter().find(|id| !id.is_loggable()) {
        Some(id) => Err(GseError::UnsupportedDevice { id: id.value() }),
        None => Ok(()),
    }
}

/// Open `path` for appending, creating it if needed.
///
/// On unix the descriptor is non-blocking.
pub(crate) fn open_append(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NONBLOCK);
    }
    options.open(path).map_err(|e| GseError::file_error(path.to_path_buf(), e))
}

/// Logger writing each configured device's payloads to its own file.
#[derive(Debug)]
pub struct FileLogger {
    writer: RoutedWriter,
    paths: BTreeMap<DeviceId, PathBuf>,
}

impl FileLogger {
    /// Validate every device id and open one descriptor per device.
    pub fn new(outputs: LogOutputs) -> Result<Self> {
        check_loggable(outputs.devices())?;

        let mut sinks: HashMap<DeviceId, Sink> = HashMap::new();
        let mut paths = BTreeMap::new();

        match outputs {
            LogOutputs::Root(root) => {
                std::fs::create_dir_all(&root).map_err(|e| GseError::file_error(root.clone(), e))?;
                for device in DeviceId::loggable() {
                    let path = root.join(format!("{}.dat", device.file_stem()));
                    sinks.insert(device, Box::new(open_append(&path)?));
                    paths.insert(device, path);
                }
            }
            LogOutputs::Paths(map) => {
                for (device, path) in map {
                    sinks.insert(device, Box::new(open_append(&path)?));
                    paths.insert(device, path);
                }
            }
            #[cfg(unix)]
            LogOutputs::Descriptors(fds) => {
                for (device, fd) in fds {
                    sinks.insert(device, Box::new(File::from(fd)));
                }
            }
        }

        Ok(Self { writer: RoutedWriter::new("file logger", sinks), paths })
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.writer.set_drain_timeout(drain_timeout);
        self
    }

    pub fn devices(&self) -> &[DeviceId] {
        self.writer.devices()
    }

    /// Files opened by path, per device. Empty for descriptor outputs.
    pub fn paths(&self) -> &BTreeMap<DeviceId, PathBuf> {
        &self.paths
    }

    /// Payloads queued for writing so far.
    pub fn logged(&self) -> u64 {
        self.writer.routed()
    }
}

#[async_trait]
impl Processor for FileLogger {
    fn name(&self) -> &str {
        "record"
    }

    async fn setup(&mut self, _transport: Arc<UdpSocket>) -> Result<()> {
        info!("Logging {} devices to file", self.writer.devices().len());
        self.writer.start();
        Ok(())
    }

    fn receive(&mut self, packet: &Packet) -> Result<()> {
        self.writer.route(packet);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.close().await;
        Ok(())
    }
}
