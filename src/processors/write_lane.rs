//! Write lane: one serialized background writer per processor

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::types::{DeviceId, Packet};

/// Byte sink owned by a write lane.
pub type Sink = Box<dyn Write + Send>;

/// Default time `close` waits for queued writes.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

struct PendingWrite {
    device: DeviceId,
    payload: Vec<u8>,
}

/// Totals reported when a lane shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneReport {
    pub writes: u64,
    pub bytes: u64,
    pub errors: u64,
}

/// Serialized writer owning every sink of one processor
///
/// `enqueue` never blocks. Writes run on a blocking thread in the exact order
/// they were enqueued, each followed by a flush. The lane is the only owner of
/// its sinks, so no lock is needed to keep receipt order.
///
/// The queue is unbounded: a slow disk or serial line grows memory instead of
/// stalling the hub.
pub struct WriteLane {
    name: String,
    tx: Option<mpsc::UnboundedSender<PendingWrite>>,
    handle: Option<JoinHandle<LaneReport>>,
    abandon: Arc<AtomicBool>,
    drain_timeout: Duration,
}

impl WriteLane {
    /// Start the writer thread. Must be called inside a tokio runtime.
    pub fn start(name: impl Into<String>, sinks: HashMap<DeviceId, Sink>, drain_timeout: Duration) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let abandon = Arc::new(AtomicBool::new(false));

        let thread_name = name.clone();
        let thread_abandon = abandon.clone();
        let handle = tokio::task::spawn_blocking(move || {
            Self::writer_loop(&thread_name, sinks, rx, &thread_abandon)
        });

        debug!("Write lane {} started", name);
        Self { name, tx: Some(tx), handle: Some(handle), abandon, drain_timeout }
    }

    fn writer_loop(
        name: &str,
        mut sinks: HashMap<DeviceId, Sink>,
        mut rx: mpsc::UnboundedReceiver<PendingWrite>,
        abandon: &AtomicBool,
    ) -> LaneReport {
        let mut report = LaneReport::default();

        while let Some(write) = rx.blocking_recv() {
            if abandon.load(Ordering::Acquire) {
                debug!("Write lane {} abandoning queued writes", name);
                break;
            }
            let Some(sink) = sinks.get_mut(&write.device) else {
                continue;
            };

            match sink.write_all(&write.payload).and_then(|_| sink.flush()) {
                Ok(()) => {
                    report.writes += 1;
                    report.bytes += write.payload.len() as u64;
                    trace!("Lane {} wrote {} bytes for {}", name, write.payload.len(), write.device);
                }
                Err(e) => {
                    report.errors += 1;
                    warn!("Write lane {} failed writing for {}: {}", name, write.device, e);
                }
            }
        }

        // Sinks close here, on the writer thread
        drop(sinks);
        report
    }

    /// Queue `payload` for `device`. Returns false once the lane is closed.
    pub fn enqueue(&self, device: DeviceId, payload: &[u8]) -> bool {
        match &self.tx {
            Some(tx) => tx.send(PendingWrite { device, payload: payload.to_vec() }).is_ok(),
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.tx.is_some()
    }

    /// Stop accepting writes and wait up to the drain timeout for the queue
    ///
    /// Writes still pending after the timeout are abandoned. Calling `close`
    /// again returns `None`.
    pub async fn close(&mut self) -> Option<LaneReport> {
        self.tx.take()?;
        let handle = self.handle.take()?;

        match tokio::time::timeout(self.drain_timeout, handle).await {
            Ok(Ok(report)) => {
                info!(
                    "Write lane {} closed: {} writes, {} bytes, {} errors",
                    self.name, report.writes, report.bytes, report.errors
                );
                Some(report)
            }
            Ok(Err(e)) => {
                warn!("Write lane {} writer panicked: {}", self.name, e);
                None
            }
            Err(_) => {
                self.abandon.store(true, Ordering::Release);
                warn!(
                    "Write lane {} did not drain within {:?}; pending writes abandoned",
                    self.name, self.drain_timeout
                );
                None
            }
        }
    }
}

impl Drop for WriteLane {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.abandon.store(true, Ordering::Release);
        }
    }
}

impl std::fmt::Debug for WriteLane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteLane").field("name", &self.name).field("open", &self.is_open()).finish()
    }
}

/// Device-routed writer shared by the file and pseudo-terminal loggers
///
/// Sinks are opened at construction and handed to a [`WriteLane`] on
/// [`start`](RoutedWriter::start). Packets for devices without a sink are
/// dropped without touching any counter.
pub struct RoutedWriter {
    name: String,
    pending: Option<HashMap<DeviceId, Sink>>,
    devices: Vec<DeviceId>,
    lane: Option<WriteLane>,
    drain_timeout: Duration,
    routed: u64,
}

impl RoutedWriter {
    pub fn new(name: impl Into<String>, sinks: HashMap<DeviceId, Sink>) -> Self {
        let mut devices: Vec<DeviceId> = sinks.keys().copied().collect();
        devices.sort();
        Self {
            name: name.into(),
            pending: Some(sinks),
            devices,
            lane: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            routed: 0,
        }
    }

    pub fn set_drain_timeout(&mut self, drain_timeout: Duration) {
        self.drain_timeout = drain_timeout;
    }

    /// Configured devices in ascending id order.
    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    /// Payloads handed to the lane so far.
    pub fn routed(&self) -> u64 {
        self.routed
    }

    /// Move the sinks onto a running lane. Later calls do nothing.
    pub fn start(&mut self) {
        if let Some(sinks) = self.pending.take() {
            self.lane = Some(WriteLane::start(self.name.clone(), sinks, self.drain_timeout));
        }
    }

    /// Queue the header-stripped payload of `packet` if its device is routed.
    pub fn route(&mut self, packet: &Packet) {
        let Some(device) = packet.device_id() else {
            return;
        };
        if self.devices.binary_search(&device).is_err() {
            return;
        }
        match &self.lane {
            Some(lane) if lane.enqueue(device, packet.payload()) => self.routed += 1,
            _ => debug!("{} not running, dropping packet for {}", self.name, device),
        }
    }

    /// Drain and close the lane, or drop unopened sinks.
    pub async fn close(&mut self) -> Option<LaneReport> {
        self.pending = None;
        let mut lane = self.lane.take()?;
        lane.close().await
    }
}

impl std::fmt::Debug for RoutedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedWriter")
            .field("name", &self.name)
            .field("devices", &self.devices)
            .field("routed", &self.routed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct SlowSink;

    impl Write for SlowSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(50));
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn writes_keep_enqueue_order() {
        let sink = SharedSink::default();
        let mut sinks: HashMap<DeviceId, Sink> = HashMap::new();
        sinks.insert(DeviceId(0xC0), Box::new(sink.clone()));
        let mut lane = WriteLane::start("order", sinks, DEFAULT_DRAIN_TIMEOUT);

        let mut expected = Vec::new();
        for i in 0..500u16 {
            let payload = i.to_be_bytes();
            expected.extend_from_slice(&payload);
            assert!(lane.enqueue(DeviceId(0xC0), &payload));
        }

        let report = lane.close().await.unwrap();
        assert_eq!(report.writes, 500);
        assert_eq!(*sink.0.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn unknown_device_is_skipped() {
        let sink = SharedSink::default();
        let mut sinks: HashMap<DeviceId, Sink> = HashMap::new();
        sinks.insert(DeviceId(0xD0), Box::new(sink.clone()));
        let mut lane = WriteLane::start("skip", sinks, DEFAULT_DRAIN_TIMEOUT);

        lane.enqueue(DeviceId(0xC3), b"ignored");
        lane.enqueue(DeviceId(0xD0), b"kept");
        let report = lane.close().await.unwrap();

        assert_eq!(report.writes, 1);
        assert_eq!(&*sink.0.lock().unwrap(), b"kept");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_late_writes() {
        let mut lane = WriteLane::start("twice", HashMap::new(), DEFAULT_DRAIN_TIMEOUT);
        assert!(lane.close().await.is_some());
        assert!(lane.close().await.is_none());
        assert!(!lane.enqueue(DeviceId(0xC0), b"late"));
    }

    #[tokio::test]
    async fn drain_timeout_abandons_backlog() {
        let mut sinks: HashMap<DeviceId, Sink> = HashMap::new();
        sinks.insert(DeviceId(0xC0), Box::new(SlowSink));
        let mut lane = WriteLane::start("slow", sinks, Duration::from_millis(20));

        for _ in 0..20 {
            lane.enqueue(DeviceId(0xC0), b"x");
        }
        assert!(lane.close().await.is_none());
    }

    #[tokio::test]
    async fn routed_writer_strips_headers_and_ignores_others() {
        use crate::types::build_packet;

        let sink = SharedSink::default();
        let mut sinks: HashMap<DeviceId, Sink> = HashMap::new();
        sinks.insert(DeviceId(0xC0), Box::new(sink.clone()));
        let mut writer = RoutedWriter::new("routed", sinks);
        writer.start();

        writer.route(&build_packet(DeviceId(0xC0), 0, &[1, 2, 3, 4]));
        writer.route(&build_packet(DeviceId(0xC1), 0, &[9, 9]));
        writer.route(&Packet::from(vec![0u8; 3]));
        writer.route(&build_packet(DeviceId(0xC0), 0, &[5, 6, 7, 8, 9, 10]));
        assert_eq!(writer.routed(), 2);

        writer.close().await.unwrap();
        assert_eq!(&*sink.0.lock().unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }
}
