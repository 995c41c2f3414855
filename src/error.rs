//! Error types for the relay and the frame extraction engine.
//!
//! All fallible operations in this crate return [`GseError`]. Every variant
//! belongs to one [`ErrorKind`], which tells the caller whether the failure is
//! a configuration problem (fix the inputs), a resource problem (the socket,
//! serial port, file or replay binary is unavailable) or a lifecycle misuse.
//!
//! ## Transient mismatches are not errors
//!
//! Sync failures, checksum mismatches and packets for unconfigured devices are
//! recorded in counters and never surface as a `GseError`. Live capture windows
//! cannot be repeated, so the pipeline keeps running.
//!
//! ## Helper Constructors
//!
//! ```rust
//! use gse_relay::{ErrorKind, GseError};
//! use std::path::PathBuf;
//!
//! let err = GseError::configuration("listen port out of range");
//! assert_eq!(err.kind(), ErrorKind::Configuration);
//!
//! let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
//! let file_err = GseError::file_error(PathBuf::from("/data/imag_0.dat"), io_err);
//! assert!(file_err.is_fatal());
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T, E = GseError> = std::result::Result<T, E>;

/// Broad classification of a [`GseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or conflicting inputs, raised before or at setup time.
    Configuration,
    /// An OS resource could not be acquired.
    Resource,
    /// A lifecycle method was called in the wrong state.
    State,
    /// I/O failure after startup.
    Io,
}

/// Main error type for relay operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GseError {
    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Device id {id:#04x} is not supported here")]
    UnsupportedDevice { id: u8 },

    #[error("Only one output option may be selected (got {options})")]
    ConflictingOutputs { options: String },

    #[error("Invalid packet code {code} at stream offset {offset}")]
    InvalidPacketCode { code: u8, offset: u64 },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Failed to bind datagram socket on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open serial port {port}")]
    SerialOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Playback executable not found at {path}")]
    PlaybackMissing { path: PathBuf },

    #[error("Playback failed: {reason}")]
    Playback {
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to allocate pseudo-terminal")]
    Pty {
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid hub transition from {from} to {to}")]
    InvalidState { from: &'static str, to: &'static str },

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

impl GseError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GseError::Configuration { .. }
            | GseError::UnsupportedDevice { .. }
            | GseError::ConflictingOutputs { .. }
            | GseError::InvalidPacketCode { .. }
            | GseError::Parse { .. } => ErrorKind::Configuration,
            GseError::Bind { .. }
            | GseError::SerialOpen { .. }
            | GseError::PlaybackMissing { .. }
            | GseError::Playback { .. }
            | GseError::File { .. }
            | GseError::Pty { .. } => ErrorKind::Resource,
            GseError::InvalidState { .. } => ErrorKind::State,
            GseError::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns whether this error aborts the run.
    ///
    /// An invalid packet code only aborts the extraction step that hit it; the
    /// reader resumes on the next byte.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GseError::InvalidPacketCode { .. })
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            GseError::Configuration { .. } | GseError::Parse { .. } => vec![
                "Check the pipeline configuration values",
                "Verify addresses are valid IPv4 or IPv6 literals",
            ],
            GseError::UnsupportedDevice { .. } => vec![
                "Use an imager id (0xC0-0xC6) or spectrometer id (0xD0-0xD2)",
                "Ids may be given in decimal or 0x-prefixed hex",
            ],
            GseError::ConflictingOutputs { .. } => {
                vec!["Select exactly one of root directory, path map or descriptor map"]
            }
            GseError::InvalidPacketCode { .. } => vec![
                "Check the imager packet length table",
                "Inspect the raw capture around the reported offset",
            ],
            GseError::Bind { .. } => vec![
                "Check no other process is bound to the port",
                "Verify the address belongs to a local interface",
            ],
            GseError::SerialOpen { .. } => vec![
                "Check the serial device exists and is not in use",
                "Check permissions on the serial device",
                "Set BOOMS_SERIAL_DIR when using relative port names",
            ],
            GseError::PlaybackMissing { .. } => {
                vec!["Install the replay binary", "Set the BOOMS_PLAYBACK environment variable"]
            }
            GseError::Playback { .. } => {
                vec!["Check the capture file is readable", "Run the replay binary by hand"]
            }
            GseError::File { .. } => vec![
                "Check the file exists and is readable",
                "Check directory permissions",
                "Ensure sufficient disk space",
            ],
            GseError::Pty { .. } => vec!["Check the pseudo-terminal limit (/proc/sys/kernel/pty/max)"],
            GseError::InvalidState { .. } => vec!["Bind the hub before running it"],
            GseError::Io(_) => vec!["Check system resources", "Restart the relay"],
        }
    }

    /// Helper constructor for configuration errors.
    pub fn configuration(reason: impl Into<String>) -> Self {
        GseError::Configuration { reason: reason.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        GseError::File { path, source }
    }

    /// Helper constructor for parse errors.
    pub fn parse_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        GseError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for playback failures.
    pub fn playback_failed(reason: impl Into<String>, source: Option<std::io::Error>) -> Self {
        GseError::Playback { reason: reason.into(), source }
    }
}
