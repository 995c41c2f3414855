//! Ordered processor chain with a single teardown path

use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::processor::Processor;
use crate::types::Packet;
use crate::{GseError, Result};

/// Ordered list of processors sharing one lifecycle
///
/// Setup, delivery and close all walk the processors in insertion order.
/// `close_all` runs at most once, whichever way the run ends.
#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Box<dyn Processor>>,
    closed: bool,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a processor to the end of the chain.
    pub fn push<P: Processor>(&mut self, processor: P) {
        self.processors.push(Box::new(processor));
    }

    /// Builder form of [`push`](Self::push).
    pub fn with<P: Processor>(mut self, processor: P) -> Self {
        self.push(processor);
        self
    }

    pub fn push_boxed(&mut self, processor: Box<dyn Processor>) {
        self.processors.push(processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Set up every processor in order
    ///
    /// On the first failure the processors already set up are closed in
    /// order, the chain is marked closed and the error is returned. No partial
    /// chain is ever left running.
    pub async fn setup_all(&mut self, transport: Arc<UdpSocket>) -> Result<()> {
        if self.closed {
            return Err(GseError::InvalidState { from: "closed", to: "active" });
        }

        for index in 0..self.processors.len() {
            let result = self.processors[index].setup(transport.clone()).await;
            if let Err(e) = result {
                warn!("Setup of {} failed: {}", self.processors[index].name(), e);
                self.closed = true;
                for processor in &mut self.processors[..index] {
                    if let Err(close_err) = processor.close().await {
                        warn!("Close of {} after failed setup: {}", processor.name(), close_err);
                    }
                }
                return Err(e);
            }
            debug!("Processor {} ready", self.processors[index].name());
        }

        info!("Processor chain ready: {}", self.names().join(" -> "));
        Ok(())
    }

    /// Deliver `packet` to every processor in order
    ///
    /// A processor that returns an error is logged and skipped for this packet
    /// only; the rest of the chain still receives it. Returns the number of
    /// processors that failed.
    pub fn deliver(&mut self, packet: &Packet) -> usize {
        let mut failures = 0;
        for processor in &mut self.processors {
            if let Err(e) = processor.receive(packet) {
                failures += 1;
                warn!("Processor {} failed on {}-byte packet: {}", processor.name(), packet.len(), e);
            }
        }
        failures
    }

    /// Close every processor in order, exactly once
    ///
    /// Every processor is closed even if an earlier one fails; the first error
    /// is returned. Later calls are no-ops.
    pub async fn close_all(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut first_error = None;
        for processor in &mut self.processors {
            match processor.close().await {
                Ok(()) => debug!("Processor {} closed", processor.name()),
                Err(e) => {
                    warn!("Close of {} failed: {}", processor.name(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorChain").field("processors", &self.names()).field("closed", &self.closed).finish()
    }
}
