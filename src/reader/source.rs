//! Byte sources feeding a frame reader

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::info;

use crate::types::DeviceId;
use crate::{GseError, Result};

/// Read timeout on serial ports; an expired read reports [`Chunk::Idle`].
const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Result of one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk {
    /// `n` bytes were read into the buffer.
    Data(usize),
    /// Nothing available right now; try again.
    Idle,
    /// The source is exhausted.
    End,
}

/// Blocking byte source driven by a reader thread.
pub trait ByteSource: Send + 'static {
    /// Read the next chunk into `buf`.
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<Chunk>;

    /// Replay rate in frame markers per second, for paced sources.
    fn markers_per_second(&self) -> Option<f64> {
        None
    }

    /// Human-readable name for log lines.
    fn describe(&self) -> String;
}

/// Live serial line.
pub struct SerialSource {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialSource {
    /// Open `path` at `baud_rate`, 8N1 without flow control.
    pub fn open(path: &Path, baud_rate: u32) -> Result<Self> {
        let name = path.to_string_lossy().into_owned();
        let port = serialport::new(name.as_str(), baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(SERIAL_READ_TIMEOUT)
            .open()
            .map_err(|source| GseError::SerialOpen { port: name.clone(), source })?;

        info!("Reading serial port {} at {} baud", name, baud_rate);
        Ok(Self { port, name })
    }

    /// Open `path` at the baud rate of `device`'s class.
    pub fn for_device(path: &Path, device: DeviceId) -> Result<Self> {
        let baud_rate = device.baud_rate().ok_or(GseError::UnsupportedDevice { id: device.value() })?;
        Self::open(path, baud_rate)
    }
}

impl ByteSource for SerialSource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<Chunk> {
        match self.port.read(buf) {
            Ok(0) => Ok(Chunk::Idle),
            Ok(n) => Ok(Chunk::Data(n)),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => Ok(Chunk::Idle),
            Err(e) => Err(e),
        }
    }

    fn describe(&self) -> String {
        format!("serial {}", self.name)
    }
}

/// Recorded capture file.
///
/// By default the file is read as fast as possible and ends at EOF. A paced
/// source throttles to a number of frame markers per second; a following
/// source keeps polling at EOF for data appended by another process.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    path: PathBuf,
    follow: bool,
    pacing: Option<f64>,
}

impl FileSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| GseError::file_error(path.clone(), e))?;
        Ok(Self { file, path, follow: false, pacing: None })
    }

    /// Keep polling at EOF instead of ending.
    pub fn follow(mut self) -> Self {
        self.follow = true;
        self
    }

    /// Replay at `markers_per_second` frame markers per second.
    pub fn paced(mut self, markers_per_second: f64) -> Result<Self> {
        if !(markers_per_second.is_finite() && markers_per_second > 0.0) {
            return Err(GseError::configuration(format!(
                "replay rate must be positive, got {markers_per_second}"
            )));
        }
        self.pacing = Some(markers_per_second);
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileSource {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<Chunk> {
        loop {
            return match self.file.read(buf) {
                Ok(0) if self.follow => Ok(Chunk::Idle),
                Ok(0) => Ok(Chunk::End),
                Ok(n) => Ok(Chunk::Data(n)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
        }
    }

    fn markers_per_second(&self) -> Option<f64> {
        self.pacing
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// Any blocking reader; ends at EOF.
#[derive(Debug)]
pub struct ReadSource<R> {
    reader: R,
    name: String,
}

impl<R: Read + Send + 'static> ReadSource<R> {
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self { reader, name: name.into() }
    }
}

impl<R: Read + Send + 'static> ByteSource for ReadSource<R> {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<Chunk> {
        match self.reader.read(buf) {
            Ok(0) => Ok(Chunk::End),
            Ok(n) => Ok(Chunk::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Chunk::Idle),
            Err(e) => Err(e),
        }
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
