//! Test utilities: synthetic instrument frames and recording processors
//!
//! Builders here produce byte streams that the extractor policies accept, so
//! unit tests and benches can construct captures without recorded fixtures.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::extract::IMAGER_PACKET_LENGTHS;
use crate::extract::checksum::{SPECTROMETER_SYNC, additive_checksum};
use crate::extract::SPECTROMETER_FRAME_LEN;
use crate::processor::Processor;
use crate::types::Packet;
use crate::{GseError, Result};

/// Build one imager frame for `type_code` using the default length table.
///
/// Body bytes have their top bit cleared so they never carry the sync pattern.
pub fn imager_frame(type_code: u8, fill: u8) -> Vec<u8> {
    let code = type_code & 0x07;
    let len = IMAGER_PACKET_LENGTHS[usize::from(code)];
    let body = fill & 0x7F;

    let mut frame = vec![body; len];
    frame[0] = 0xAC | (code >> 1);
    frame[1] = ((code & 0x01) << 7) | body;
    frame
}

/// Concatenate imager frames for `codes`, each filled with its index.
pub fn imager_stream(codes: &[u8]) -> Vec<u8> {
    codes.iter().enumerate().flat_map(|(i, &code)| imager_frame(code, i as u8)).collect()
}

/// Build one spectrometer frame with a valid trailing checksum.
pub fn spectrometer_frame(seed: u8) -> Vec<u8> {
    let mut frame = Vec::with_capacity(SPECTROMETER_FRAME_LEN);
    frame.extend_from_slice(&SPECTROMETER_SYNC);
    frame.extend((0..SPECTROMETER_FRAME_LEN - 4).map(|i| seed.wrapping_add(i as u8) & 0x7F));
    let sum = additive_checksum(&frame);
    frame.extend_from_slice(&sum.to_be_bytes());
    frame
}

/// A long imager capture with a junk burst every `junk_every` frames.
pub fn synthetic_imager_capture(frames: usize, junk_every: usize) -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..frames {
        if junk_every > 0 && i % junk_every == 0 {
            data.extend_from_slice(&[0x00, 0xFF, 0x13]);
        }
        data.extend(imager_frame((i % 8) as u8, i as u8));
    }
    data
}

/// Shared log of lifecycle calls made on [`RecordingProcessor`]s.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: String) {
        if let Ok(mut log) = self.0.lock() {
            log.push(entry);
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

/// Processor that records every call into a [`CallLog`].
#[derive(Debug)]
pub struct RecordingProcessor {
    name: &'static str,
    log: CallLog,
    fail_setup: bool,
    fail_receive: bool,
}

impl RecordingProcessor {
    pub fn new(name: &'static str, log: &CallLog) -> Self {
        Self { name, log: log.clone(), fail_setup: false, fail_receive: false }
    }

    pub fn failing_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    pub fn failing_receive(mut self) -> Self {
        self.fail_receive = true;
        self
    }
}

#[async_trait]
impl Processor for RecordingProcessor {
    fn name(&self) -> &str {
        self.name
    }

    async fn setup(&mut self, _transport: Arc<UdpSocket>) -> Result<()> {
        self.log.push(format!("{}:setup", self.name));
        if self.fail_setup {
            return Err(GseError::configuration(format!("{} refused setup", self.name)));
        }
        Ok(())
    }

    fn receive(&mut self, packet: &Packet) -> Result<()> {
        self.log.push(format!("{}:receive:{}", self.name, packet.len()));
        if self.fail_receive {
            return Err(GseError::configuration(format!("{} refused packet", self.name)));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.log.push(format!("{}:close", self.name));
        Ok(())
    }
}
