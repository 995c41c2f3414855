//! Serial relay: write one instrument's payloads to a real serial line

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serialport::{DataBits, FlowControl, Parity, StopBits};
use tokio::net::UdpSocket;
use tracing::{debug, info};

use super::write_lane::{DEFAULT_DRAIN_TIMEOUT, Sink, WriteLane};
use crate::processor::Processor;
use crate::types::{DeviceId, Packet};
use crate::{GseError, Result};

/// Write timeout applied to the opened port.
const SERIAL_WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Resolve a port name against the serial alias directory.
///
/// Absolute paths are kept; anything else is joined onto `serial_dir`.
pub fn resolve_port(port: &Path, serial_dir: &Path) -> PathBuf {
    if port.is_absolute() { port.to_path_buf() } else { serial_dir.join(port) }
}

/// Relay for a single imager or spectrometer serial line.
///
/// Packets whose id byte matches the configured device have their 16-byte
/// header stripped and the payload written to the port; every other packet is
/// ignored.
#[derive(Debug)]
pub struct SerialRelay {
    device: DeviceId,
    port: PathBuf,
    baud_rate: u32,
    drain_timeout: Duration,
    lane: Option<WriteLane>,
}

impl SerialRelay {
    /// Create a relay for `device` on `port`.
    ///
    /// # Errors
    ///
    /// [`GseError::UnsupportedDevice`] when `device` is neither an imager nor a
    /// spectrometer.
    pub fn new(device: DeviceId, port: impl Into<PathBuf>) -> Result<Self> {
        let baud_rate = device.baud_rate().ok_or(GseError::UnsupportedDevice { id: device.value() })?;
        Ok(Self { device, port: port.into(), baud_rate, drain_timeout: DEFAULT_DRAIN_TIMEOUT, lane: None })
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn port(&self) -> &Path {
        &self.port
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn open_port(&self) -> Result<Sink> {
        let path = self.port.to_string_lossy().into_owned();
        let port = serialport::new(path.as_str(), self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(SERIAL_WRITE_TIMEOUT)
            .open()
            .map_err(|source| GseError::SerialOpen { port: path.clone(), source })?;

        info!("Opened serial port {} at {} baud for {}", path, self.baud_rate, self.device);
        Ok(Box::new(port))
    }
}

#[async_trait]
impl Processor for SerialRelay {
    fn name(&self) -> &str {
        "serial"
    }

    async fn setup(&mut self, _transport: Arc<UdpSocket>) -> Result<()> {
        let sink = self.open_port()?;
        let sinks = HashMap::from([(self.device, sink)]);
        let name = format!("serial {}", self.device);
        self.lane = Some(WriteLane::start(name, sinks, self.drain_timeout));
        Ok(())
    }

    fn receive(&mut self, packet: &Packet) -> Result<()> {
        if packet.device_id() != Some(self.device) {
            return Ok(());
        }
        match &self.lane {
            Some(lane) if lane.enqueue(self.device, packet.payload()) => {}
            _ => debug!("Serial relay for {} not running, dropping packet", self.device),
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut lane) = self.lane.take() {
            lane.close().await;
        }
        Ok(())
    }
}
