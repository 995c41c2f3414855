//! Dedicated frame reader.
//!
//! A [`FrameReader`] owns one [`FrameExtractor`] and drives it from a blocking
//! [`ByteSource`] on its own thread. Frames flow to the async side through a
//! bounded channel, and extractor counters are published on a watch channel.
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use gse_relay::extract::ImagerPolicy;
//! use gse_relay::reader::{FileSource, FrameReader, ReaderConfig};
//!
//! # async fn example() -> gse_relay::Result<()> {
//! let source = FileSource::open("imag_0.dat")?;
//! let mut frames = FrameReader::spawn(source, ImagerPolicy::new(), ReaderConfig::default())?.into_stream();
//! while let Some(frame) = frames.next().await {
//!     println!("{:?} {} bytes", frame.kind, frame.len());
//! }
//! println!("{:?}", frames.stats());
//! # Ok(())
//! # }
//! ```

mod source;

pub use source::{ByteSource, Chunk, FileSource, ReadSource, SerialSource};

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::Stream;
use pin_project_lite::pin_project;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::extract::{FrameExtractor, FramePolicy};
use crate::types::{ExtractorStats, Frame};
use crate::{GseError, Result};

/// Consecutive read errors tolerated before the reader gives up.
const MAX_READ_ERRORS: u32 = 10;
/// Longest single sleep, so cancellation is noticed promptly.
const PAUSE_SLICE: Duration = Duration::from_millis(20);

/// Reader tuning.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Bytes requested per read.
    pub chunk_size: usize,
    /// Frames buffered between the reader and its consumer.
    pub channel_capacity: usize,
    /// Append every raw byte read to this file.
    pub archive: Option<PathBuf>,
    /// Base delay after a read error, doubled per consecutive error.
    pub error_backoff: Duration,
    /// Delay before polling an idle source again.
    pub idle_poll: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            channel_capacity: 1024,
            archive: None,
            error_backoff: Duration::from_millis(50),
            idle_poll: Duration::from_millis(20),
        }
    }
}

impl ReaderConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_archive(mut self, path: impl Into<PathBuf>) -> Self {
        self.archive = Some(path.into());
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(GseError::configuration("reader chunk size must be non-zero"));
        }
        if self.channel_capacity == 0 {
            return Err(GseError::configuration("reader channel capacity must be non-zero"));
        }
        Ok(())
    }
}

/// Why the reader thread stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderExit {
    Finished,
    Cancelled,
    ConsumerGone,
    TooManyErrors,
}

/// Handle to a running reader thread.
///
/// Dropping the handle (or the [`FrameStream`] made from it) cancels the
/// reader.
pub struct FrameReader {
    frames: mpsc::Receiver<Frame>,
    stats: watch::Receiver<ExtractorStats>,
    cancel: CancellationToken,
    guard: DropGuard,
}

impl FrameReader {
    /// Start reading `source` through a fresh extractor for `policy`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S, P>(source: S, policy: P, config: ReaderConfig) -> Result<Self>
    where
        S: ByteSource,
        P: FramePolicy,
    {
        config.validate()?;

        let archive = match &config.archive {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| GseError::file_error(path.clone(), e))?;
                Some(BufWriter::new(file))
            }
            None => None,
        };

        let (frame_tx, frames) = mpsc::channel(config.channel_capacity);
        let (stats_tx, stats) = watch::channel(ExtractorStats::default());
        let cancel = CancellationToken::new();

        let worker = ReadLoop {
            source,
            extractor: FrameExtractor::new(policy),
            frames: frame_tx,
            stats: stats_tx,
            cancel: cancel.clone(),
            archive,
            config,
        };
        tokio::task::spawn_blocking(move || worker.run());

        Ok(Self { frames, stats, guard: cancel.clone().drop_guard(), cancel })
    }

    /// Next frame, or `None` once the reader has stopped and the queue is empty.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }

    /// Latest published extractor counters.
    pub fn stats(&self) -> ExtractorStats {
        *self.stats.borrow()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<ExtractorStats> {
        self.stats.clone()
    }

    /// Ask the reader to stop. Frames already queued can still be received.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn into_stream(self) -> FrameStream {
        FrameStream {
            inner: ReceiverStream::new(self.frames),
            stats: self.stats,
            cancel: self.cancel,
            _guard: self.guard,
        }
    }
}

pin_project! {
    /// Frames from a [`FrameReader`] as a [`Stream`].
    pub struct FrameStream {
        #[pin]
        inner: ReceiverStream<Frame>,
        stats: watch::Receiver<ExtractorStats>,
        cancel: CancellationToken,
        _guard: DropGuard,
    }
}

impl FrameStream {
    pub fn stats(&self) -> ExtractorStats {
        *self.stats.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for FrameStream {
    type Item = Frame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.project().inner.poll_next(cx)
    }
}

struct ReadLoop<S, P> {
    source: S,
    extractor: FrameExtractor<P>,
    frames: mpsc::Sender<Frame>,
    stats: watch::Sender<ExtractorStats>,
    cancel: CancellationToken,
    archive: Option<BufWriter<File>>,
    config: ReaderConfig,
}

impl<S: ByteSource, P: FramePolicy> ReadLoop<S, P> {
    fn run(mut self) {
        let name = self.source.describe();
        info!("Frame reader started on {}", name);

        let exit = self.read_all();
        if let Some(archive) = self.archive.as_mut() {
            if let Err(e) = archive.flush() {
                warn!("Failed to flush archive for {}: {}", name, e);
            }
        }

        let stats = self.extractor.stats();
        info!(
            ?exit,
            bytes = stats.bytes_read,
            frames = stats.frame_count,
            junk = stats.junk_bytes,
            "Frame reader stopped on {}",
            name
        );
    }

    fn read_all(&mut self) -> ReaderExit {
        let mut buf = vec![0u8; self.config.chunk_size];
        let started = Instant::now();
        let mut error_count = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return ReaderExit::Cancelled;
            }

            match self.source.read_chunk(&mut buf) {
                Ok(Chunk::Data(n)) => {
                    error_count = 0;
                    self.archive(&buf[..n]);
                    if let Err(e) = self.extractor.append(&buf[..n]) {
                        warn!("Extraction fault: {}", e);
                    }
                    if !self.publish() {
                        return ReaderExit::ConsumerGone;
                    }
                    if let Some(rate) = self.source.markers_per_second() {
                        let markers = self.extractor.stats().frame_markers;
                        let due = started + Duration::from_secs_f64(markers as f64 / rate);
                        if !self.pause_until(due) {
                            return ReaderExit::Cancelled;
                        }
                    }
                }
                Ok(Chunk::Idle) => {
                    let due = Instant::now() + self.config.idle_poll;
                    if !self.pause_until(due) {
                        return ReaderExit::Cancelled;
                    }
                }
                Ok(Chunk::End) => {
                    if let Err(e) = self.extractor.finish() {
                        warn!("Extraction fault at end of input: {}", e);
                    }
                    if !self.publish() {
                        return ReaderExit::ConsumerGone;
                    }
                    return ReaderExit::Finished;
                }
                Err(e) => {
                    error_count += 1;
                    error!("Read error ({}/{}): {}", error_count, MAX_READ_ERRORS, e);

                    if error_count >= MAX_READ_ERRORS {
                        error!("Too many consecutive read errors, stopping reader");
                        return ReaderExit::TooManyErrors;
                    }

                    let backoff = self.config.error_backoff * (1 << error_count.min(5));
                    if !self.pause_until(Instant::now() + backoff) {
                        return ReaderExit::Cancelled;
                    }
                }
            }
        }
    }

    fn archive(&mut self, bytes: &[u8]) {
        let Some(archive) = self.archive.as_mut() else {
            return;
        };
        if let Err(e) = archive.write_all(bytes) {
            warn!("Archive write failed, archiving disabled: {}", e);
            self.archive = None;
        }
    }

    /// Publish stats, then hand queued frames to the consumer.
    /// Returns false once the consumer has gone away.
    fn publish(&mut self) -> bool {
        self.stats.send_replace(self.extractor.stats());
        let frames: Vec<Frame> = self.extractor.drain_frames().collect();
        for frame in frames {
            if self.frames.blocking_send(frame).is_err() {
                debug!("Frame consumer dropped");
                return false;
            }
        }
        true
    }

    /// Sleep until `due`. Returns false if cancelled first.
    fn pause_until(&self, due: Instant) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= due {
                return true;
            }
            std::thread::sleep((due - now).min(PAUSE_SLICE));
        }
    }
}
