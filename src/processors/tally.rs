//! Telemetry tally: datagram and byte counts per system id and type code

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::processor::Processor;
use crate::types::{DeviceId, Packet};
use crate::Result;

/// Counts for one (system id, type code) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TallyEntry {
    pub packets: u64,
    pub bytes: u64,
}

type TallyMap = BTreeMap<(DeviceId, u8), TallyEntry>;

/// Read side of a [`TelemetryTally`], cheap to clone.
///
/// Packets too short to carry an id and type code are counted under
/// [`TallyHandle::short_packets`].
#[derive(Debug, Clone, Default)]
pub struct TallyHandle {
    counts: Arc<Mutex<TallyMap>>,
    short: Arc<Mutex<TallyEntry>>,
}

impl TallyHandle {
    /// Copy of every count recorded so far, ordered by id then type code.
    pub fn snapshot(&self) -> TallyMap {
        self.counts.lock().map(|counts| counts.clone()).unwrap_or_default()
    }

    /// Counts for one pair.
    pub fn get(&self, device: DeviceId, type_code: u8) -> TallyEntry {
        self.counts
            .lock()
            .ok()
            .and_then(|counts| counts.get(&(device, type_code)).copied())
            .unwrap_or_default()
    }

    /// Sum over every pair, short packets included.
    pub fn total(&self) -> TallyEntry {
        let mut total = self.short_packets();
        for entry in self.snapshot().values() {
            total.packets += entry.packets;
            total.bytes += entry.bytes;
        }
        total
    }

    pub fn short_packets(&self) -> TallyEntry {
        self.short.lock().map(|short| *short).unwrap_or_default()
    }

    fn record(&self, packet: &Packet) {
        let bytes = packet.len() as u64;
        let bump = |entry: &mut TallyEntry| {
            entry.packets += 1;
            entry.bytes += bytes;
        };

        match (packet.device_id(), packet.type_code()) {
            (Some(device), Some(type_code)) => {
                if let Ok(mut counts) = self.counts.lock() {
                    bump(counts.entry((device, type_code)).or_default());
                }
            }
            _ => {
                if let Ok(mut short) = self.short.lock() {
                    bump(&mut short);
                }
            }
        }
    }
}

/// Processor counting traffic for dashboards and end-of-run summaries.
#[derive(Debug, Default)]
pub struct TelemetryTally {
    handle: TallyHandle,
}

impl TelemetryTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that stays valid after the processor is closed.
    pub fn handle(&self) -> TallyHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl Processor for TelemetryTally {
    fn name(&self) -> &str {
        "tally"
    }

    async fn setup(&mut self, _transport: Arc<UdpSocket>) -> Result<()> {
        Ok(())
    }

    fn receive(&mut self, packet: &Packet) -> Result<()> {
        self.handle.record(packet);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let total = self.handle.total();
        info!("Tally: {} datagrams, {} bytes", total.packets, total.bytes);
        for ((device, type_code), entry) in self.handle.snapshot() {
            debug!("  {} type {:#04x}: {} datagrams, {} bytes", device, type_code, entry.packets, entry.bytes);
        }
        Ok(())
    }
}
