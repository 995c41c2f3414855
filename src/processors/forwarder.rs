//! Forwarder: resend every datagram unmodified to a fixed target

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::write_lane::DEFAULT_DRAIN_TIMEOUT;
use crate::processor::Processor;
use crate::types::Packet;
use crate::Result;

#[derive(Debug, Default)]
struct Counters {
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

/// Ordered sender task fed by `receive`.
#[derive(Debug)]
struct SendLane {
    queue: mpsc::UnboundedSender<Packet>,
    task: JoinHandle<()>,
}

/// Best-effort datagram forwarder.
///
/// Sends go out through the hub's own socket from a dedicated task, so
/// `receive` never waits and datagrams leave in arrival order.
#[derive(Debug)]
pub struct Forwarder {
    target: SocketAddr,
    lane: Option<SendLane>,
    counters: Arc<Counters>,
    drain_timeout: Duration,
}

impl Forwarder {
    pub fn new(target: SocketAddr) -> Self {
        Self { target, lane: None, counters: Arc::default(), drain_timeout: DEFAULT_DRAIN_TIMEOUT }
    }

    /// How long `close` waits for queued sends.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Datagrams handed to the socket so far.
    pub fn forwarded(&self) -> u64 {
        self.counters.forwarded.load(Ordering::Relaxed)
    }

    /// Datagrams that could not be sent.
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

async fn send_all(
    transport: Arc<UdpSocket>,
    target: SocketAddr,
    mut queue: mpsc::UnboundedReceiver<Packet>,
    counters: Arc<Counters>,
) {
    while let Some(packet) = queue.recv().await {
        match transport.send_to(packet.as_bytes(), target).await {
            Ok(_) => {
                counters.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Forward to {} failed: {}", target, e);
            }
        }
    }
}

#[async_trait]
impl Processor for Forwarder {
    fn name(&self) -> &str {
        "forward"
    }

    async fn setup(&mut self, transport: Arc<UdpSocket>) -> Result<()> {
        info!("Forwarding datagrams to {}", self.target);
        let (queue, pending) = mpsc::unbounded_channel();
        let task = tokio::spawn(send_all(transport, self.target, pending, self.counters.clone()));
        self.lane = Some(SendLane { queue, task });
        Ok(())
    }

    fn receive(&mut self, packet: &Packet) -> Result<()> {
        let Some(lane) = &self.lane else {
            debug!("Forwarder not set up, dropping {} bytes", packet.len());
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };

        if lane.queue.send(packet.clone()).is_err() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Forward lane to {} has stopped", self.target);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(SendLane { queue, mut task }) = self.lane.take() {
            drop(queue);
            if tokio::time::timeout(self.drain_timeout, &mut task).await.is_err() {
                warn!("Forward lane to {} did not drain in {:?}, abandoning", self.target, self.drain_timeout);
                task.abort();
            }
        }
        info!(
            "Forwarder to {} closed ({} forwarded, {} dropped)",
            self.target,
            self.forwarded(),
            self.dropped()
        );
        Ok(())
    }
}
