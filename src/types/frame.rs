//! Instrument frames recovered from a raw byte stream

use std::sync::Arc;

/// Classification of an extracted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Imager packet with its 3-bit type code.
    Imager { type_code: u8 },
    /// Fixed-length spectrometer report.
    Spectrometer,
}

/// One validated frame.
///
/// Frames are produced by a [`FrameExtractor`](crate::extract::FrameExtractor)
/// and handed to exactly one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub data: Arc<[u8]>,
}

impl Frame {
    pub fn new(kind: FrameKind, data: &[u8]) -> Self {
        Self { kind, data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Imager type code, if this is an imager frame.
    pub fn type_code(&self) -> Option<u8> {
        match self.kind {
            FrameKind::Imager { type_code } => Some(type_code),
            FrameKind::Spectrometer => None,
        }
    }
}

/// Counters kept by one extractor instance.
///
/// All fields only ever grow. `junk_bytes` plus the bytes of every emitted
/// frame plus the retained tail always equals `bytes_read`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractorStats {
    /// Bytes appended so far.
    pub bytes_read: u64,
    /// Bytes discarded while resynchronizing.
    pub junk_bytes: u64,
    /// Frames emitted.
    pub frame_count: u64,
    /// Frames that mark a new unit of data (imager type 5, every spectrum).
    pub frame_markers: u64,
}
