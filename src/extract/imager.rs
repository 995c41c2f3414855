//! Imager framing: variable length selected by a 3-bit type code

use super::checksum::{imager_boundaries_valid, imager_sync, imager_type_code};
use super::policy::{FramePolicy, Probe};
use crate::types::FrameKind;
use crate::{GseError, Result};

/// Frame length for each imager type code.
pub const IMAGER_PACKET_LENGTHS: [usize; 8] = [7, 11, 11, 11, 11, 8, 18, 10];

/// Type code of the packet that opens a new image frame.
pub const NEW_FRAME_TYPE: u8 = 5;

/// Imager scan policy.
///
/// A candidate is accepted when its first byte and the byte just after it
/// both carry the sync pattern. Resynchronization advances one byte at a time.
#[derive(Debug, Clone)]
pub struct ImagerPolicy {
    lengths: Vec<usize>,
    max_len: usize,
}

impl Default for ImagerPolicy {
    fn default() -> Self {
        Self { lengths: IMAGER_PACKET_LENGTHS.to_vec(), max_len: 18 }
    }
}

impl ImagerPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom length table, indexed by type code.
    ///
    /// Type codes beyond the end of the table are reported as
    /// [`GseError::InvalidPacketCode`] during extraction.
    pub fn with_lengths(lengths: Vec<usize>) -> Result<Self> {
        if lengths.is_empty() || lengths.len() > IMAGER_PACKET_LENGTHS.len() {
            return Err(GseError::configuration(format!(
                "imager length table must have 1 to 8 entries, got {}",
                lengths.len()
            )));
        }
        if let Some(bad) = lengths.iter().find(|&&len| len < 2) {
            return Err(GseError::configuration(format!(
                "imager packet length {bad} is shorter than the 2-byte type field"
            )));
        }
        let max_len = lengths.iter().copied().max().unwrap_or(2);
        Ok(Self { lengths, max_len })
    }

    /// Frame length for `code`, if the table knows it.
    pub fn length_of(&self, code: u8) -> Option<usize> {
        self.lengths.get(usize::from(code)).copied()
    }
}

impl FramePolicy for ImagerPolicy {
    fn window(&self) -> usize {
        self.max_len + 1
    }

    fn probe(&self, buf: &[u8], start: usize) -> Probe {
        let first = buf[start];
        if !imager_sync(first) {
            return Probe::Junk;
        }
        let code = imager_type_code(first, buf[start + 1]);
        let Some(len) = self.length_of(code) else {
            return Probe::Fault { code };
        };
        if !imager_boundaries_valid(buf, start, len) {
            return Probe::Junk;
        }
        Probe::Frame { len, kind: FrameKind::Imager { type_code: code }, marker: code == NEW_FRAME_TYPE }
    }
}
