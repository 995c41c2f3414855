//! Validated processor configurations and their factories

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::processor::Processor;
use crate::processors::{FileLogger, Forwarder, LogOutputs, SerialRelay, TelemetryTally, resolve_port};
use crate::types::DeviceId;
use crate::{GseError, Result};

/// Parse an IPv4 or IPv6 literal and a port in 0..=65535.
pub fn parse_target(address: &str, port: u32) -> Result<SocketAddr> {
    let ip: IpAddr = address
        .trim()
        .parse()
        .map_err(|_| GseError::parse_error("address", format!("{address:?} is not an IPv4 or IPv6 address")))?;
    let port = u16::try_from(port)
        .map_err(|_| GseError::parse_error("port", format!("{port} is outside 0-65535")))?;
    Ok(SocketAddr::new(ip, port))
}

/// One processor, validated and ready to build.
///
/// Construct through the factory functions, which run every check a
/// processor would otherwise hit at setup time.
#[derive(Debug)]
pub enum ProcessorConfig {
    Forwarder { target: SocketAddr },
    SerialRelay { device_id: DeviceId, serial_port: PathBuf },
    FileLogger { outputs: LogOutputs },
    PseudoSerialLogger { devices: Vec<DeviceId>, alias_dir: Option<PathBuf> },
    Tally,
}

impl ProcessorConfig {
    pub fn forwarder(address: &str, port: u32) -> Result<Self> {
        Ok(ProcessorConfig::Forwarder { target: parse_target(address, port)? })
    }

    /// Relay for `device_id`; a relative `serial_port` resolves under `serial_dir`.
    pub fn serial_relay(device_id: DeviceId, serial_port: &Path, serial_dir: &Path) -> Result<Self> {
        if device_id.baud_rate().is_none() {
            return Err(GseError::UnsupportedDevice { id: device_id.value() });
        }
        Ok(ProcessorConfig::SerialRelay { device_id, serial_port: resolve_port(serial_port, serial_dir) })
    }

    /// File logger from whichever single output option was given.
    pub fn file_logger(root: Option<PathBuf>, paths: Option<BTreeMap<DeviceId, PathBuf>>) -> Result<Self> {
        #[cfg(unix)]
        let outputs = LogOutputs::select(root, paths, None)?;
        #[cfg(not(unix))]
        let outputs = LogOutputs::select(root, paths)?;

        if let LogOutputs::Paths(paths) = &outputs {
            if let Some(id) = paths.keys().find(|id| !id.is_loggable()) {
                return Err(GseError::UnsupportedDevice { id: id.value() });
            }
        }
        Ok(ProcessorConfig::FileLogger { outputs })
    }

    /// Pseudo-terminal logger; `None` means every known instrument.
    pub fn pseudo_serial(devices: Option<Vec<DeviceId>>, alias_dir: Option<PathBuf>) -> Result<Self> {
        if cfg!(not(unix)) {
            return Err(GseError::configuration("pseudo-terminals are only available on unix"));
        }
        let devices = devices.unwrap_or_else(|| DeviceId::loggable().collect());
        if let Some(id) = devices.iter().find(|id| !id.is_loggable()) {
            return Err(GseError::UnsupportedDevice { id: id.value() });
        }
        Ok(ProcessorConfig::PseudoSerialLogger { devices, alias_dir })
    }

    pub fn tally() -> Self {
        ProcessorConfig::Tally
    }

    /// Short name matching the processor's own.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessorConfig::Forwarder { .. } => "forward",
            ProcessorConfig::SerialRelay { .. } => "serial",
            ProcessorConfig::FileLogger { .. } => "record",
            ProcessorConfig::PseudoSerialLogger { .. } => "pseudo_serial",
            ProcessorConfig::Tally => "tally",
        }
    }

    /// Create the processor. Files and pseudo-terminals are opened here.
    pub fn build(self, drain_timeout: Duration) -> Result<Box<dyn Processor>> {
        let processor: Box<dyn Processor> = match self {
            ProcessorConfig::Forwarder { target } => Box::new(Forwarder::new(target).with_drain_timeout(drain_timeout)),
            ProcessorConfig::SerialRelay { device_id, serial_port } => {
                Box::new(SerialRelay::new(device_id, serial_port)?.with_drain_timeout(drain_timeout))
            }
            ProcessorConfig::FileLogger { outputs } => {
                Box::new(FileLogger::new(outputs)?.with_drain_timeout(drain_timeout))
            }
            #[cfg(unix)]
            ProcessorConfig::PseudoSerialLogger { devices, alias_dir } => Box::new(
                crate::processors::PseudoSerialLogger::new(devices, alias_dir.as_deref())?
                    .with_drain_timeout(drain_timeout),
            ),
            #[cfg(not(unix))]
            ProcessorConfig::PseudoSerialLogger { .. } => {
                return Err(GseError::configuration("pseudo-terminals are only available on unix"));
            }
            ProcessorConfig::Tally => Box::new(TelemetryTally::new()),
        };
        Ok(processor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_accept_v4_and_v6() {
        assert_eq!(parse_target("127.0.0.1", 30000).unwrap(), "127.0.0.1:30000".parse().unwrap());
        assert_eq!(parse_target("::1", 0).unwrap().port(), 0);
        assert!(matches!(parse_target("localhost", 1), Err(GseError::Parse { .. })));
        assert!(matches!(parse_target("10.0.0.1", 65536), Err(GseError::Parse { .. })));
    }

    #[test]
    fn serial_relay_resolves_and_checks_ids() {
        let config = ProcessorConfig::serial_relay(DeviceId(0xD2), Path::new("spec2"), Path::new("/dev/booms"))
            .unwrap();
        match config {
            ProcessorConfig::SerialRelay { serial_port, .. } => {
                assert_eq!(serial_port, PathBuf::from("/dev/booms/spec2"));
            }
            other => panic!("unexpected {other:?}"),
        }
        let err = ProcessorConfig::serial_relay(DeviceId(0xA0), Path::new("hk"), Path::new("/dev")).unwrap_err();
        assert!(matches!(err, GseError::UnsupportedDevice { id: 0xA0 }));
    }

    #[test]
    fn file_logger_needs_exactly_one_output() {
        let paths = BTreeMap::from([(DeviceId(0xC0), PathBuf::from("imag0.dat"))]);
        let err = ProcessorConfig::file_logger(Some(PathBuf::from("/data")), Some(paths.clone())).unwrap_err();
        assert!(matches!(err, GseError::ConflictingOutputs { .. }));
        assert!(matches!(ProcessorConfig::file_logger(None, None), Err(GseError::Configuration { .. })));
        assert!(ProcessorConfig::file_logger(None, Some(paths)).is_ok());

        let bad = BTreeMap::from([(DeviceId(0xC7), PathBuf::from("imag7.dat"))]);
        assert!(matches!(
            ProcessorConfig::file_logger(None, Some(bad)),
            Err(GseError::UnsupportedDevice { id: 0xC7 })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn pseudo_serial_defaults_to_all_instruments() {
        match ProcessorConfig::pseudo_serial(None, None).unwrap() {
            ProcessorConfig::PseudoSerialLogger { devices, .. } => assert_eq!(devices.len(), 10),
            other => panic!("unexpected {other:?}"),
        }
        assert!(ProcessorConfig::pseudo_serial(Some(vec![DeviceId(0x60)]), None).is_err());
    }
}
