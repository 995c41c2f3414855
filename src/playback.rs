//! Playback controller for the external capture replay binary
//!
//! The replay binary reads a recorded flight computer capture and re-emits
//! each datagram over UDP, so a hub in playback mode sees exactly the traffic
//! it would see live. Its command line is
//!
//! ```text
//! <playback> <capture> [-i address] [-p port] [-fs device] [-ft type] [-s speed]
//! ```
//!
//! The binary is located through `BOOMS_PLAYBACK` (see
//! [`GseEnv`](crate::config::GseEnv)) and checked before anything is spawned.

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::GseEnv;
use crate::types::DeviceId;
use crate::{GseError, Result};

/// Optional replay flags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackOptions {
    /// Destination address (`-i`).
    pub address: Option<IpAddr>,
    /// Destination port (`-p`).
    pub port: Option<u16>,
    /// Only replay packets from this system id (`-fs`).
    pub device_filter: Option<DeviceId>,
    /// Only replay packets of this telemetry type (`-ft`).
    pub type_filter: Option<u8>,
    /// Replay speed multiplier (`-s`).
    pub speed: Option<f64>,
}

impl PlaybackOptions {
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Reject speeds that are not positive finite numbers.
    pub fn validate(&self) -> Result<()> {
        match self.speed {
            Some(speed) if !(speed.is_finite() && speed > 0.0) => {
                Err(GseError::configuration(format!("replay speed must be positive, got {speed}")))
            }
            _ => Ok(()),
        }
    }

    /// Flag arguments in fixed order.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |flag: &str, value: String| {
            args.push(flag.to_string());
            args.push(value);
        };

        if let Some(address) = self.address {
            push("-i", address.to_string());
        }
        if let Some(port) = self.port {
            push("-p", port.to_string());
        }
        if let Some(device) = self.device_filter {
            push("-fs", device.value().to_string());
        }
        if let Some(type_code) = self.type_filter {
            push("-ft", type_code.to_string());
        }
        if let Some(speed) = self.speed {
            push("-s", speed.to_string());
        }
        args
    }
}

/// What the replay process left behind.
#[derive(Debug, Clone)]
pub struct PlaybackOutcome {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Launches the replay binary and waits for it to exit.
#[derive(Debug, Clone)]
pub struct PlaybackController {
    executable: PathBuf,
}

impl PlaybackController {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self { executable: executable.into() }
    }

    pub fn from_env(env: &GseEnv) -> Self {
        Self::new(env.playback.clone())
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Locate the executable: paths are checked directly, bare names are
    /// searched on `PATH`.
    pub fn resolve_executable(&self) -> Result<PathBuf> {
        let missing = || GseError::PlaybackMissing { path: self.executable.clone() };

        if self.executable.components().count() > 1 || self.executable.is_absolute() {
            return if self.executable.is_file() { Ok(self.executable.clone()) } else { Err(missing()) };
        }

        if self.executable.is_file() {
            return Ok(self.executable.clone());
        }
        std::env::var_os("PATH")
            .and_then(|paths| {
                std::env::split_paths(&paths)
                    .map(|dir| dir.join(&self.executable))
                    .find(|candidate| candidate.is_file())
            })
            .ok_or_else(missing)
    }

    /// Full argument vector after the executable.
    pub fn command_args(capture: &Path, options: &PlaybackOptions) -> Vec<OsString> {
        let mut args = vec![capture.as_os_str().to_os_string()];
        args.extend(options.to_args().into_iter().map(OsString::from));
        args
    }

    /// Replay `capture` and wait for the process to exit
    ///
    /// The executable and the capture are checked before spawning. A nonzero
    /// exit status is logged, not returned as an error: datagrams already
    /// emitted stay valid. Dropping the returned future kills the process.
    pub async fn run(&self, capture: &Path, options: &PlaybackOptions) -> Result<PlaybackOutcome> {
        options.validate()?;
        let executable = self.resolve_executable()?;
        if !capture.is_file() {
            return Err(GseError::file_error(
                capture.to_path_buf(),
                std::io::Error::new(std::io::ErrorKind::NotFound, "capture file not found"),
            ));
        }

        let args = Self::command_args(capture, options);
        info!("Starting playback: {} {:?}", executable.display(), args);

        let child = Command::new(&executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                GseError::playback_failed(format!("failed to start {}", executable.display()), Some(e))
            })?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| GseError::playback_failed("failed waiting for playback", Some(e)))?;

        let outcome = PlaybackOutcome {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !outcome.stderr.trim().is_empty() {
            warn!("Playback stderr: {}", outcome.stderr.trim_end());
        }
        if !outcome.stdout.trim().is_empty() {
            debug!("Playback stdout: {}", outcome.stdout.trim_end());
        }
        if outcome.status.success() {
            info!("Playback finished");
        } else {
            warn!("Playback exited with {}", outcome.status);
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_in_fixed_order() {
        let options = PlaybackOptions {
            address: Some("127.0.0.1".parse().unwrap()),
            port: Some(20501),
            device_filter: Some(DeviceId(0xC0)),
            type_filter: Some(3),
            speed: Some(2.5),
        };
        assert_eq!(
            options.to_args(),
            vec!["-i", "127.0.0.1", "-p", "20501", "-fs", "192", "-ft", "3", "-s", "2.5"]
        );

        let args = PlaybackController::command_args(Path::new("/data/run 1.bin"), &PlaybackOptions::default());
        assert_eq!(args, vec![OsString::from("/data/run 1.bin")]);
    }

    #[test]
    fn speed_must_be_positive_and_finite() {
        for speed in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(PlaybackOptions::default().with_speed(speed).validate().is_err());
        }
        assert!(PlaybackOptions::default().with_speed(0.25).validate().is_ok());
    }

    #[tokio::test]
    async fn missing_executable_is_reported_before_spawning() {
        let capture = tempfile::NamedTempFile::new().unwrap();
        let controller = PlaybackController::new("/nonexistent/bin/playback");
        let err = controller.run(capture.path(), &PlaybackOptions::default()).await.unwrap_err();
        assert!(matches!(err, GseError::PlaybackMissing { .. }));

        let bare = PlaybackController::new("gse-relay-no-such-playback-binary");
        assert!(matches!(bare.resolve_executable(), Err(GseError::PlaybackMissing { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_capture_is_a_file_error() {
        let controller = PlaybackController::new("/bin/sh");
        let err = controller.run(Path::new("/nonexistent/capture.bin"), &PlaybackOptions::default()).await;
        assert!(matches!(err, Err(GseError::File { .. })));
    }
}
