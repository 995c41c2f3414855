//! Spectrometer framing: fixed length, sync prefix and trailing checksum

use super::checksum::{SPECTROMETER_SYNC, spectrometer_checksum_valid};
use super::policy::{FramePolicy, Probe};
use crate::types::FrameKind;

/// Length of one spectrometer frame, prefix and checksum included.
pub const SPECTROMETER_FRAME_LEN: usize = 212;

/// Spectrometer scan policy.
///
/// A checksum mismatch skips only the start byte, not the whole candidate,
/// so a stream shifted by a dropped byte still resynchronizes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpectrometerPolicy;

impl SpectrometerPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl FramePolicy for SpectrometerPolicy {
    fn window(&self) -> usize {
        SPECTROMETER_FRAME_LEN
    }

    fn probe(&self, buf: &[u8], start: usize) -> Probe {
        let candidate = &buf[start..start + SPECTROMETER_FRAME_LEN];
        if !candidate.starts_with(&SPECTROMETER_SYNC) {
            return Probe::Junk;
        }
        if !spectrometer_checksum_valid(candidate) {
            return Probe::Junk;
        }
        Probe::Frame { len: SPECTROMETER_FRAME_LEN, kind: FrameKind::Spectrometer, marker: true }
    }
}
