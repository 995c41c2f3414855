//! Frame extraction from unstructured instrument byte streams.
//!
//! A [`FrameExtractor`] accumulates raw bytes, scans them for frame boundaries
//! under a [`FramePolicy`], queues every validated [`Frame`] and keeps only the
//! unconsumed tail for the next [`append`](FrameExtractor::append).
//!
//! Two policies are provided:
//!
//! - [`ImagerPolicy`]: variable length chosen by a 3-bit type code, accepted
//!   when both boundary bytes carry the sync pattern
//! - [`SpectrometerPolicy`]: 212-byte frames with a `0xEB 0x90` prefix and a
//!   16-bit additive checksum
//!
//! ## Chunk invariance
//!
//! A candidate is judged only once the policy window is fully buffered, and
//! all scan state lives in the retained buffer. Feeding the same bytes in any
//! chunking yields the same frames and the same junk count.
//!
//! ## Usage Example
//!
//! ```rust
//! use gse_relay::extract::{FrameExtractor, SpectrometerPolicy};
//!
//! let mut extractor = FrameExtractor::new(SpectrometerPolicy::new());
//! let outcome = extractor.append(&[0x00, 0x01, 0x02]).unwrap();
//! assert_eq!(outcome.frames, 0);
//! assert_eq!(extractor.stats().bytes_read, 3);
//! ```

pub mod checksum;
mod imager;
mod policy;
mod spectrometer;

pub use imager::{IMAGER_PACKET_LENGTHS, ImagerPolicy, NEW_FRAME_TYPE};
pub use policy::{FramePolicy, Probe};
pub use spectrometer::{SPECTROMETER_FRAME_LEN, SpectrometerPolicy};

use std::collections::VecDeque;
use tracing::trace;

use crate::types::{ExtractorStats, Frame};
use crate::{GseError, Result};

/// What one scan pass produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Frames queued by this pass.
    pub frames: usize,
    /// Junk bytes counted by this pass.
    pub junk: u64,
}

/// Stateful scanner turning raw bytes into validated frames.
///
/// Not restartable: construct a new instance to start over with an empty
/// buffer and zeroed counters.
#[derive(Debug)]
pub struct FrameExtractor<P> {
    policy: P,
    buffer: Vec<u8>,
    queue: VecDeque<Frame>,
    stats: ExtractorStats,
}

impl<P: FramePolicy> FrameExtractor<P> {
    pub fn new(policy: P) -> Self {
        Self { policy, buffer: Vec::new(), queue: VecDeque::new(), stats: ExtractorStats::default() }
    }

    /// Append raw bytes and scan as far as the buffered data allows.
    ///
    /// Validated frames are queued for [`pop_frame`](Self::pop_frame) or
    /// [`drain_frames`](Self::drain_frames).
    ///
    /// # Errors
    ///
    /// [`GseError::InvalidPacketCode`] for the first candidate in this pass
    /// carrying a type code the policy does not know. Every faulting byte is
    /// counted as junk and the pass still runs to the end of the buffered
    /// data, so frames after the fault are queued as usual.
    pub fn append(&mut self, bytes: &[u8]) -> Result<AppendOutcome> {
        self.stats.bytes_read += bytes.len() as u64;
        self.buffer.extend_from_slice(bytes);
        self.scan()
    }

    /// Flush at end of stream.
    ///
    /// Scans whatever is still decidable, then counts the remaining tail as
    /// junk. A fault met along the way is returned after the flush.
    pub fn finish(&mut self) -> Result<AppendOutcome> {
        let scanned = self.scan();

        let leftover = self.buffer.len() as u64;
        self.buffer.clear();
        self.stats.junk_bytes += leftover;

        let mut total = scanned?;
        total.junk += leftover;
        Ok(total)
    }

    fn scan(&mut self) -> Result<AppendOutcome> {
        let window = self.policy.window();
        let base = self.stats.bytes_read - self.buffer.len() as u64;
        let mut outcome = AppendOutcome::default();
        let mut fault = None;
        let mut start = 0;

        while start + window <= self.buffer.len() {
            match self.policy.probe(&self.buffer, start) {
                probe @ Probe::Frame { len, kind, marker } => {
                    trace!(?probe, offset = base + start as u64, "frame");
                    self.queue.push_back(Frame::new(kind, &self.buffer[start..start + len]));
                    self.stats.frame_count += 1;
                    if marker {
                        self.stats.frame_markers += 1;
                    }
                    outcome.frames += 1;
                    start += len;
                }
                Probe::Junk => {
                    outcome.junk += 1;
                    start += 1;
                }
                Probe::Fault { code } => {
                    trace!(code, offset = base + start as u64, "unknown type code");
                    fault.get_or_insert(GseError::InvalidPacketCode { code, offset: base + start as u64 });
                    outcome.junk += 1;
                    start += 1;
                }
            }
        }

        self.buffer.drain(..start);
        self.stats.junk_bytes += outcome.junk;

        match fault {
            Some(err) => Err(err),
            None => Ok(outcome),
        }
    }

    /// Take the oldest queued frame.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.queue.pop_front()
    }

    /// Take every queued frame in extraction order.
    pub fn drain_frames(&mut self) -> impl Iterator<Item = Frame> + '_ {
        self.queue.drain(..)
    }

    /// Number of frames waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> ExtractorStats {
        self.stats
    }

    /// Bytes retained for the next scan.
    pub fn tail(&self) -> &[u8] {
        &self.buffer
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{imager_frame, imager_stream, spectrometer_frame};
    use crate::types::FrameKind;
    use proptest::prelude::*;

    fn extract_chunked<P: FramePolicy>(policy: P, data: &[u8], chunk: usize) -> (Vec<Frame>, ExtractorStats) {
        let mut extractor = FrameExtractor::new(policy);
        let mut frames = Vec::new();
        for piece in data.chunks(chunk) {
            extractor.append(piece).expect("no faults in test data");
            frames.extend(extractor.drain_frames());
        }
        (frames, extractor.stats())
    }

    fn emitted_bytes(frames: &[Frame]) -> u64 {
        frames.iter().map(|f| f.len() as u64).sum()
    }

    #[test]
    fn imager_type_table_lengths() {
        for code in 0..8u8 {
            let mut data = imager_frame(code, 0x11);
            data.extend(imager_stream(&[0; 4]));
            let (frames, _) = extract_chunked(ImagerPolicy::new(), &data, 4096);
            assert_eq!(frames[0].kind, FrameKind::Imager { type_code: code });
            assert_eq!(frames[0].len(), IMAGER_PACKET_LENGTHS[code as usize]);
        }
    }

    #[test]
    fn imager_unknown_code_is_a_fault() {
        let policy = ImagerPolicy::with_lengths(vec![7, 11, 11, 11, 11, 8]).unwrap();
        let mut extractor = FrameExtractor::new(policy);

        let mut data = imager_frame(0, 0x01);
        data.extend(imager_frame(6, 0x02));
        data.extend(imager_stream(&[0; 4]));

        let err = extractor.append(&data).unwrap_err();
        assert!(matches!(err, GseError::InvalidPacketCode { code: 6, offset: 7 }));
        assert_eq!(extractor.queued(), 4, "frames on both sides of the fault are queued");
        assert_eq!(extractor.stats().junk_bytes, 18);
        assert_eq!(extractor.tail().len(), 7);
    }

    #[test]
    fn faults_do_not_depend_on_chunking() {
        let lengths = vec![7, 11, 11, 11, 11, 8];
        let mut data = imager_frame(0, 0x01);
        data.extend(imager_frame(6, 0x02));
        data.extend(imager_stream(&[0; 3]));
        data.extend(imager_frame(7, 0x03));
        data.extend(imager_stream(&[0; 8]));

        for chunk in [1, 7, 112, 4096] {
            let mut extractor = FrameExtractor::new(ImagerPolicy::with_lengths(lengths.clone()).unwrap());
            let mut faults = Vec::new();
            let mut frames = Vec::new();
            for piece in data.chunks(chunk) {
                if let Err(GseError::InvalidPacketCode { code, .. }) = extractor.append(piece) {
                    faults.push(code);
                }
                frames.extend(extractor.drain_frames());
            }

            assert_eq!(faults.first(), Some(&6), "chunk size {chunk}");
            assert_eq!(frames.len(), 11, "chunk size {chunk}");
            assert_eq!(extractor.stats().junk_bytes, 28, "chunk size {chunk}");
            assert_eq!(extractor.tail().len(), 7, "chunk size {chunk}");
        }
    }

    #[test]
    fn imager_skips_leading_junk_one_byte_at_a_time() {
        let mut data = vec![0x00, 0xAC, 0x13, 0xFF];
        data.extend(imager_stream(&[0, 5, 6, 7]));
        let (frames, stats) = extract_chunked(ImagerPolicy::new(), &data, 4096);

        assert_eq!(stats.junk_bytes, 4);
        assert_eq!(frames.len(), 3, "last frame waits for lookahead");
        assert_eq!(stats.frame_markers, 1);
    }

    #[test]
    fn spectrometer_checksum_sensitivity() {
        let good = spectrometer_frame(0x42);

        let (frames, stats) = extract_chunked(SpectrometerPolicy, &good, 4096);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].data[..], &good[..]);
        assert_eq!(stats.junk_bytes, 0);

        let mut body_corrupt = good.clone();
        body_corrupt[100] ^= 0x04;
        let (frames, stats) = extract_chunked(SpectrometerPolicy, &body_corrupt, 4096);
        assert!(frames.is_empty());
        assert_eq!(stats.junk_bytes, 1);

        let mut sum_corrupt = good.clone();
        sum_corrupt[SPECTROMETER_FRAME_LEN - 1] ^= 0x01;
        let (frames, stats) = extract_chunked(SpectrometerPolicy, &sum_corrupt, 4096);
        assert!(frames.is_empty());
        assert_eq!(stats.junk_bytes, 1);
    }

    #[test]
    fn spectrometer_resyncs_after_dropped_byte() {
        let mut data = spectrometer_frame(1);
        data.remove(50);
        data.extend(spectrometer_frame(2));
        data.extend(spectrometer_frame(3));

        let (frames, stats) = extract_chunked(SpectrometerPolicy, &data, 4096);
        assert_eq!(frames.len(), 2);
        assert_eq!(stats.junk_bytes, (SPECTROMETER_FRAME_LEN - 1) as u64);
    }

    #[test]
    fn finish_moves_tail_to_junk() {
        let mut extractor = FrameExtractor::new(SpectrometerPolicy);
        let data = spectrometer_frame(9);
        extractor.append(&data[..100]).unwrap();
        assert_eq!(extractor.tail().len(), 100);

        let outcome = extractor.finish().unwrap();
        assert_eq!(outcome.junk, 100);
        assert!(extractor.tail().is_empty());
        assert_eq!(extractor.stats().junk_bytes, 100);
    }

    #[test]
    fn chunk_sizes_one_seven_and_4096_agree() {
        let mut data = vec![0x13, 0x37];
        data.extend(imager_stream(&[0, 1, 2, 3, 4, 5, 6, 7, 5, 0]));
        data.extend([0xAC, 0x00, 0x00]);
        data.extend(imager_stream(&[6, 6, 2]));

        let (reference, reference_stats) = extract_chunked(ImagerPolicy::new(), &data, 4096);
        for chunk in [1, 7] {
            let (frames, stats) = extract_chunked(ImagerPolicy::new(), &data, chunk);
            assert_eq!(frames, reference, "chunk size {chunk}");
            assert_eq!(stats, reference_stats, "chunk size {chunk}");
        }
        assert!(!reference.is_empty());
    }

    #[test]
    fn spectrometer_chunk_sizes_one_seven_and_4096_agree() {
        let mut damaged = spectrometer_frame(3);
        damaged.remove(100);

        let mut data = vec![0x00, 0xEB, 0x90, 0x11];
        for part in [spectrometer_frame(1), spectrometer_frame(2), damaged, spectrometer_frame(9)] {
            data.extend(part);
        }
        data.extend([0xEB, 0x90, 0x01]);

        let (reference, reference_stats) = extract_chunked(SpectrometerPolicy, &data, 4096);
        for chunk in [1, 7] {
            let (frames, stats) = extract_chunked(SpectrometerPolicy, &data, chunk);
            assert_eq!(frames, reference, "chunk size {chunk}");
            assert_eq!(stats, reference_stats, "chunk size {chunk}");
        }
        assert_eq!(reference.len(), 3);
        assert_eq!(&reference[2].data[..], spectrometer_frame(9).as_slice());
    }

    proptest! {
        #[test]
        fn imager_chunking_never_changes_output(
            noise in prop::collection::vec(any::<u8>(), 0..64usize),
            codes in prop::collection::vec(0u8..8, 0..32usize),
            chunk in 1usize..64,
        ) {
            let mut data = noise;
            data.extend(imager_stream(&codes));

            let (whole, whole_stats) = extract_chunked(ImagerPolicy::new(), &data, data.len().max(1));
            let (split, split_stats) = extract_chunked(ImagerPolicy::new(), &data, chunk);
            prop_assert_eq!(whole, split);
            prop_assert_eq!(whole_stats, split_stats);
        }

        #[test]
        fn spectrometer_counters_balance(
            noise in prop::collection::vec(any::<u8>(), 0..300usize),
            seeds in prop::collection::vec(any::<u8>(), 0..4usize),
            chunk in 1usize..512,
        ) {
            let mut data = Vec::new();
            for (i, seed) in seeds.iter().enumerate() {
                data.extend(&noise[..noise.len().min(i * 7)]);
                data.extend(spectrometer_frame(*seed));
            }
            data.extend(&noise);

            let mut extractor = FrameExtractor::new(SpectrometerPolicy);
            let mut frames = Vec::new();
            for piece in data.chunks(chunk) {
                extractor.append(piece).unwrap();
                frames.extend(extractor.drain_frames());
            }
            let stats = extractor.stats();
            prop_assert_eq!(stats.bytes_read, data.len() as u64);
            prop_assert_eq!(
                stats.junk_bytes + emitted_bytes(&frames) + extractor.tail().len() as u64,
                stats.bytes_read
            );
            prop_assert_eq!(frames.len(), seeds.len());
        }
    }
}
