//! YAML pipeline description and its validation

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::GseEnv;
use super::processor::{ProcessorConfig, parse_target};
use crate::chain::ProcessorChain;
use crate::hub::{DEFAULT_LISTEN_PORT, HubConfig};
use crate::playback::{PlaybackController, PlaybackOptions};
use crate::processors::{DEFAULT_DRAIN_TIMEOUT, TallyHandle, TelemetryTally};
use crate::types::DeviceId;
use crate::{GseError, Result};

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u32 {
    u32::from(DEFAULT_LISTEN_PORT)
}

fn default_grace_period_ms() -> u64 {
    1000
}

fn default_drain_timeout_ms() -> u64 {
    DEFAULT_DRAIN_TIMEOUT.as_millis() as u64
}

/// Socket the hub binds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u32,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self { address: default_address(), port: default_port() }
    }
}

/// Replay instead of listening live.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaybackConfig {
    pub capture: PathBuf,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<u32>,
    #[serde(default)]
    pub device_filter: Option<DeviceId>,
    #[serde(default)]
    pub type_filter: Option<u8>,
}

/// One `processors` entry, as written.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessorSpec {
    Forward {
        address: String,
        port: u32,
    },
    Serial {
        device: DeviceId,
        port: PathBuf,
    },
    Record {
        #[serde(default)]
        root: Option<PathBuf>,
        #[serde(default)]
        paths: Option<BTreeMap<DeviceId, PathBuf>>,
    },
    PseudoSerial {
        #[serde(default)]
        devices: Option<Vec<DeviceId>>,
        #[serde(default)]
        alias_dir: Option<PathBuf>,
    },
    Tally,
}

/// Whole pipeline as loaded from YAML
///
/// ```yaml
/// listen: { address: 0.0.0.0, port: 20501 }
/// grace_period_ms: 1000
/// processors:
///   - kind: forward
///     address: 127.0.0.1
///     port: 20502
///   - kind: record
///     root: /data/run1
///   - kind: serial
///     device: 0xC0
///     port: imag0
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub playback: Option<PlaybackConfig>,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    #[serde(default)]
    pub processors: Vec<ProcessorSpec>,
}

/// Playback step of a validated pipeline.
#[derive(Debug, Clone)]
pub struct PlaybackPlan {
    pub controller: PlaybackController,
    pub capture: PathBuf,
    pub options: PlaybackOptions,
}

/// Pipeline that passed validation; nothing has been opened yet.
#[derive(Debug)]
pub struct ValidatedPipeline {
    pub hub: HubConfig,
    pub playback: Option<PlaybackPlan>,
    pub drain_timeout: Duration,
    pub processors: Vec<ProcessorConfig>,
}

/// Handles into an assembled chain.
#[derive(Debug, Default)]
pub struct PipelineHandles {
    /// One per `tally` processor, in chain order.
    pub tallies: Vec<TallyHandle>,
    /// Secondary pty paths of every pseudo-serial processor.
    pub pty_paths: BTreeMap<DeviceId, PathBuf>,
}

impl PipelineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml_ng::from_str(yaml).map_err(|e| GseError::parse_error("pipeline config", e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| GseError::file_error(path.to_path_buf(), e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Check every setting and convert to tagged processor configs
    ///
    /// Every problem is collected before returning, so one run reports all of
    /// them. A single problem is returned as is; several are folded into one
    /// configuration error listing each.
    pub fn validate(&self, env: &GseEnv) -> Result<ValidatedPipeline> {
        let mut errors = Vec::new();

        let listen = parse_target(&self.listen.address, self.listen.port).map_err(|e| errors.push(e)).ok();

        let playback = self.playback.as_ref().and_then(|playback| {
            Self::validate_playback(playback, env).map_err(|e| errors.push(e)).ok()
        });

        let mut processors = Vec::new();
        for (index, spec) in self.processors.iter().enumerate() {
            match Self::validate_processor(spec, env) {
                Ok(config) => processors.push(config),
                Err(e) => {
                    debug!("Processor {} rejected: {}", index, e);
                    errors.push(e);
                }
            }
        }

        if errors.len() > 1 {
            let reasons: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(GseError::configuration(reasons.join("; ")));
        }
        if let Some(e) = errors.pop() {
            return Err(e);
        }

        let Some(listen) = listen else {
            return Err(GseError::configuration("listen address missing"));
        };
        Ok(ValidatedPipeline {
            hub: HubConfig::new(listen).with_grace_period(Duration::from_millis(self.grace_period_ms)),
            playback,
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
            processors,
        })
    }

    fn validate_playback(playback: &PlaybackConfig, env: &GseEnv) -> Result<PlaybackPlan> {
        let address = match &playback.address {
            Some(address) => Some(parse_target(address, 0)?.ip()),
            None => None,
        };
        let port = match playback.port {
            Some(port) => Some(parse_target("0.0.0.0", port)?.port()),
            None => None,
        };
        let options = PlaybackOptions {
            address,
            port,
            device_filter: playback.device_filter,
            type_filter: playback.type_filter,
            speed: playback.speed,
        };
        options.validate()?;

        Ok(PlaybackPlan {
            controller: PlaybackController::from_env(env),
            capture: env.resolve_capture(&playback.capture),
            options,
        })
    }

    fn validate_processor(spec: &ProcessorSpec, env: &GseEnv) -> Result<ProcessorConfig> {
        match spec {
            ProcessorSpec::Forward { address, port } => ProcessorConfig::forwarder(address, *port),
            ProcessorSpec::Serial { device, port } => {
                ProcessorConfig::serial_relay(*device, port, &env.serial_dir)
            }
            ProcessorSpec::Record { root, paths } => ProcessorConfig::file_logger(root.clone(), paths.clone()),
            ProcessorSpec::PseudoSerial { devices, alias_dir } => {
                ProcessorConfig::pseudo_serial(devices.clone(), alias_dir.clone())
            }
            ProcessorSpec::Tally => Ok(ProcessorConfig::tally()),
        }
    }
}

impl ValidatedPipeline {
    /// Open every processor's resources and assemble the chain in order.
    pub fn build_chain(&mut self) -> Result<(ProcessorChain, PipelineHandles)> {
        let mut chain = ProcessorChain::new();
        let mut handles = PipelineHandles::default();

        for config in self.processors.drain(..) {
            match config {
                ProcessorConfig::Tally => {
                    let tally = TelemetryTally::new();
                    handles.tallies.push(tally.handle());
                    chain.push(tally);
                }
                #[cfg(unix)]
                ProcessorConfig::PseudoSerialLogger { devices, alias_dir } => {
                    let logger = crate::processors::PseudoSerialLogger::new(devices, alias_dir.as_deref())?
                        .with_drain_timeout(self.drain_timeout);
                    handles.pty_paths.extend(logger.secondary_paths().clone());
                    chain.push(logger);
                }
                other => chain.push_boxed(other.build(self.drain_timeout)?),
            }
        }
        Ok((chain, handles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn defaults_fill_missing_sections() {
        let config = PipelineConfig::from_yaml_str("processors: []").unwrap();
        let validated = config.validate(&GseEnv::default()).unwrap();

        assert_eq!(validated.hub.listen, SocketAddr::from(([0, 0, 0, 0], 20501)));
        assert_eq!(validated.hub.grace_period, Duration::from_secs(1));
        assert_eq!(validated.drain_timeout, Duration::from_secs(2));
        assert!(validated.playback.is_none());
    }

    #[test]
    fn full_pipeline_parses_in_order() {
        let yaml = r#"
listen:
  address: 127.0.0.1
  port: 20600
grace_period_ms: 250
processors:
  - kind: forward
    address: "::1"
    port: 20502
  - kind: serial
    device: 0xC1
    port: imag1
  - kind: record
    paths:
      0xC0: /tmp/imag0.dat
      208: /tmp/spec0.dat
  - kind: tally
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        let env = GseEnv { serial_dir: PathBuf::from("/tmp/ports"), ..GseEnv::default() };
        let validated = config.validate(&env).unwrap();

        let kinds: Vec<&str> = validated.processors.iter().map(ProcessorConfig::kind).collect();
        assert_eq!(kinds, vec!["forward", "serial", "record", "tally"]);
        assert_eq!(validated.hub.grace_period, Duration::from_millis(250));
        match &validated.processors[1] {
            ProcessorConfig::SerialRelay { device_id, serial_port } => {
                assert_eq!(*device_id, DeviceId(0xC1));
                assert_eq!(serial_port, &PathBuf::from("/tmp/ports/imag1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn every_problem_is_reported_before_anything_starts() {
        let yaml = r#"
listen: { address: not-an-ip, port: 20501 }
processors:
  - kind: serial
    device: 0xB0
    port: mag
  - kind: record
    root: /tmp/a
    paths: { 0xC0: /tmp/b.dat }
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        let err = config.validate(&GseEnv::default()).unwrap_err();
        let message = err.to_string();

        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
        assert!(message.contains("not-an-ip"), "{message}");
        assert!(message.contains("0xb0"), "{message}");
        assert!(message.contains("Only one output option"), "{message}");
    }

    #[test]
    fn single_problem_keeps_its_variant() {
        let yaml = "processors:\n  - kind: record\n    root: /tmp/x\n    paths: { 0xC0: /tmp/y }\n";
        let err = PipelineConfig::from_yaml_str(yaml).unwrap().validate(&GseEnv::default()).unwrap_err();
        assert!(matches!(err, GseError::ConflictingOutputs { .. }));
    }

    #[test]
    fn playback_speed_and_capture_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("flight.bin"), b"").unwrap();
        let env = GseEnv { capture_dir: dir.path().to_path_buf(), ..GseEnv::default() };

        let ok = "playback: { capture: flight.bin, speed: 4.0, device_filter: 0xC0 }";
        let plan = PipelineConfig::from_yaml_str(ok).unwrap().validate(&env).unwrap().playback.unwrap();
        assert_eq!(plan.capture, dir.path().join("flight.bin"));
        assert_eq!(plan.options.speed, Some(4.0));
        assert_eq!(plan.options.device_filter, Some(DeviceId(0xC0)));

        let bad = "playback: { capture: flight.bin, speed: -1.0 }";
        assert!(PipelineConfig::from_yaml_str(bad).unwrap().validate(&env).is_err());
    }

    #[test]
    fn unknown_fields_and_kinds_are_parse_errors() {
        assert!(matches!(PipelineConfig::from_yaml_str("listen: { adress: x }"), Err(GseError::Parse { .. })));
        assert!(matches!(
            PipelineConfig::from_yaml_str("processors: [ { kind: teleport } ]"),
            Err(GseError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn build_chain_keeps_order_and_exposes_tallies() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "processors:\n  - kind: tally\n  - kind: record\n    root: {}\n  - kind: forward\n    address: 127.0.0.1\n    port: 9\n",
            dir.path().join("logs").display()
        );
        let mut validated = PipelineConfig::from_yaml_str(&yaml).unwrap().validate(&GseEnv::default()).unwrap();
        let (chain, handles) = validated.build_chain().unwrap();

        assert_eq!(chain.names(), vec!["tally", "record", "forward"]);
        assert_eq!(handles.tallies.len(), 1);
        assert!(dir.path().join("logs").join("imag_0.dat").exists());
    }
}
