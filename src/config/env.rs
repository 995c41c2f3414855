//! Environment-resolved paths

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Directory holding serial device aliases.
pub const SERIAL_DIR_VAR: &str = "BOOMS_SERIAL_DIR";
/// Replay binary location.
pub const PLAYBACK_VAR: &str = "BOOMS_PLAYBACK";
/// Default directory for capture files.
pub const CAPTURE_DIR_VAR: &str = "BOOMS_CAPTURE_DIR";

const DEFAULT_SERIAL_DIR: &str = "/dev/booms";
const DEFAULT_PLAYBACK: &str = "playback";
const DEFAULT_CAPTURE_DIR: &str = ".";

/// Paths taken from the environment, with defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GseEnv {
    /// Relative serial port names resolve here.
    pub serial_dir: PathBuf,
    /// Replay binary; a bare name is searched on `PATH`.
    pub playback: PathBuf,
    /// Relative capture paths that do not exist resolve here.
    pub capture_dir: PathBuf,
}

impl Default for GseEnv {
    fn default() -> Self {
        Self {
            serial_dir: PathBuf::from(DEFAULT_SERIAL_DIR),
            playback: PathBuf::from(DEFAULT_PLAYBACK),
            capture_dir: PathBuf::from(DEFAULT_CAPTURE_DIR),
        }
    }
}

impl GseEnv {
    /// Read the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let defaults = Self::default();
        let get = |name: &str, default: PathBuf| {
            lookup(name).filter(|value| !value.is_empty()).map(PathBuf::from).unwrap_or(default)
        };
        Self {
            serial_dir: get(SERIAL_DIR_VAR, defaults.serial_dir),
            playback: get(PLAYBACK_VAR, defaults.playback),
            capture_dir: get(CAPTURE_DIR_VAR, defaults.capture_dir),
        }
    }

    /// Resolve a capture path
    ///
    /// Absolute or existing paths are kept. Otherwise the path is tried under
    /// the capture directory, falling back to the original when that does not
    /// exist either.
    pub fn resolve_capture(&self, capture: &Path) -> PathBuf {
        if capture.is_absolute() || capture.exists() {
            return capture.to_path_buf();
        }
        let candidate = self.capture_dir.join(capture);
        if candidate.exists() { candidate } else { capture.to_path_buf() }
    }
}
