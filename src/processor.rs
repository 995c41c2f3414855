//! Processor trait for datagram consumers

use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::Result;
use crate::types::Packet;

/// Trait for packet processors driven by the [`DatagramHub`](crate::hub::DatagramHub)
///
/// Each processor owns only its private state. The hub calls the three
/// lifecycle methods in a fixed order:
///
/// 1. [`setup`](Processor::setup) once, before the first packet
/// 2. [`receive`](Processor::receive) for every datagram, in arrival order
/// 3. [`close`](Processor::close) exactly once, on every exit path
#[async_trait::async_trait]
pub trait Processor: Send + 'static {
    /// Short name used in log lines
    fn name(&self) -> &str;

    /// Prepare the processor for delivery
    ///
    /// `transport` is the hub's bound socket, shared read-only. Processors
    /// that send datagrams keep a clone; others ignore it.
    ///
    /// Returns:
    /// - `Ok(())` - Ready to receive
    /// - `Err(e)` - Startup fails; the hub closes processors already set up
    async fn setup(&mut self, transport: Arc<UdpSocket>) -> Result<()>;

    /// Handle one datagram
    ///
    /// Must not block: writes are handed to a background writer and the call
    /// returns immediately. Packets for devices this processor does not route
    /// are ignored without error.
    fn receive(&mut self, packet: &Packet) -> Result<()>;

    /// Release every resource held by the processor
    ///
    /// Pending background writes get a bounded drain period; anything still
    /// queued afterwards is abandoned.
    async fn close(&mut self) -> Result<()>;
}

#[async_trait::async_trait]
impl<P: Processor + ?Sized> Processor for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn setup(&mut self, transport: Arc<UdpSocket>) -> Result<()> {
        (**self).setup(transport).await
    }

    fn receive(&mut self, packet: &Packet) -> Result<()> {
        (**self).receive(packet)
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}
