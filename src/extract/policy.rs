//! Scan policy seam between the extractor loop and instrument framing

use crate::types::FrameKind;

/// Verdict for one candidate start position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// A valid frame of `len` bytes starts here.
    Frame { len: usize, kind: FrameKind, marker: bool },
    /// The start byte cannot begin a frame; skip it.
    Junk,
    /// The start byte carries an unknown type code.
    Fault { code: u8 },
}

/// Instrument-specific framing rules.
///
/// The extractor calls [`probe`](FramePolicy::probe) only when at least
/// [`window`](FramePolicy::window) bytes are buffered from `start`, so a
/// verdict never depends on how the input was chunked.
pub trait FramePolicy: Send + 'static {
    /// Bytes needed past a candidate start before it can be judged.
    fn window(&self) -> usize;

    /// Judge the candidate frame starting at `buf[start]`.
    fn probe(&self, buf: &[u8], start: usize) -> Probe;
}

impl<P: FramePolicy + ?Sized> FramePolicy for Box<P> {
    fn window(&self) -> usize {
        (**self).window()
    }

    fn probe(&self, buf: &[u8], start: usize) -> Probe {
        (**self).probe(buf, start)
    }
}
