//! Datagram hub: one socket, one processor chain, one cleanup path.
//!
//! The hub binds a UDP socket and hands every datagram it receives to a
//! [`ProcessorChain`], in arrival order. Datagrams come either from the
//! network ([`Source::Live`]) or from the replay binary started by a
//! [`PlaybackController`] ([`Source::Playback`]), which sends into the same
//! socket, so delivery is identical in both modes.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle --bind--> Bound --run--> Active --> Draining --> Closed
//! ```
//!
//! Whatever ends the run (cancellation, end of playback, a socket error or a
//! failed processor setup), [`DatagramHub::close`] is the only teardown path:
//! processors are closed once each, in list order, then the socket is dropped.
//! If the `run` future itself is dropped, call `close` to finish the teardown.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use gse_relay::chain::ProcessorChain;
//! use gse_relay::hub::{DatagramHub, HubConfig, Source};
//! use gse_relay::processors::Forwarder;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> gse_relay::Result<()> {
//! let mut hub = DatagramHub::new(HubConfig::default());
//! hub.bind().await?;
//!
//! let chain = ProcessorChain::new().with(Forwarder::new("127.0.0.1:20502".parse().unwrap()));
//! let cancel = CancellationToken::new();
//! hub.run(chain, Source::Live, cancel).await?;
//! # Ok(())
//! # }
//! ```

mod state;
#[cfg(test)]
mod tests;

pub use state::{HubState, HubStats};

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::chain::ProcessorChain;
use crate::playback::{PlaybackController, PlaybackOptions, PlaybackOutcome};
use crate::types::Packet;
use crate::{GseError, Result};

/// Port the flight computer sends telemetry to.
pub const DEFAULT_LISTEN_PORT: u16 = 20501;

/// Default time the hub keeps receiving after playback exits.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Largest datagram the hub accepts.
pub const MAX_DATAGRAM: usize = 65_535;

/// Hub settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Local address to bind.
    pub listen: SocketAddr,
    /// How long to keep receiving after playback exits.
    ///
    /// Best-effort: datagrams still in flight after this period are lost and
    /// background writes are bounded separately by each processor's drain
    /// timeout.
    pub grace_period: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_LISTEN_PORT)),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl HubConfig {
    pub fn new(listen: SocketAddr) -> Self {
        Self { listen, ..Self::default() }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

/// Where datagrams come from.
#[derive(Debug)]
pub enum Source {
    /// Whatever arrives on the socket, until cancelled.
    Live,
    /// Datagrams re-emitted by the replay binary.
    ///
    /// When `options.port` is unset the hub's own port is passed.
    Playback { controller: PlaybackController, capture: PathBuf, options: PlaybackOptions },
}

/// Why a run ended.
#[derive(Debug)]
pub enum HubExit {
    /// The cancellation token fired.
    Cancelled,
    /// Playback exited and the grace period elapsed.
    PlaybackComplete(PlaybackOutcome),
}

/// Datagram hub owning the socket and the processor chain.
pub struct DatagramHub {
    config: HubConfig,
    state: HubState,
    socket: Option<Arc<UdpSocket>>,
    chain: Option<ProcessorChain>,
    stats: watch::Sender<HubStats>,
}

impl DatagramHub {
    pub fn new(config: HubConfig) -> Self {
        let (stats, _) = watch::channel(HubStats::default());
        Self { config, state: HubState::Idle, socket: None, chain: None, stats }
    }

    /// Create a hub for `addr` and bind it.
    pub async fn bind_to(addr: SocketAddr) -> Result<Self> {
        let mut hub = Self::new(HubConfig::new(addr));
        hub.bind().await?;
        Ok(hub)
    }

    /// Bind the configured address. `Idle -> Bound`.
    ///
    /// # Errors
    ///
    /// [`GseError::Bind`] when the address cannot be bound, and
    /// [`GseError::InvalidState`] when the hub is not idle.
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.state != HubState::Idle {
            return Err(GseError::InvalidState { from: self.state.as_str(), to: HubState::Bound.as_str() });
        }
        let addr = self.config.listen;
        let socket = UdpSocket::bind(addr).await.map_err(|source| GseError::Bind { addr, source })?;
        let local = socket.local_addr()?;

        self.socket = Some(Arc::new(socket));
        self.state.advance(HubState::Bound)?;
        info!("Hub bound to {}", local);
        Ok(local)
    }

    pub fn state(&self) -> HubState {
        self.state
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Bound address, while the socket is held.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|socket| socket.local_addr().ok())
    }

    /// Counters for this session.
    pub fn stats(&self) -> HubStats {
        *self.stats.borrow()
    }

    /// Watch counters while the hub is running.
    pub fn subscribe_stats(&self) -> watch::Receiver<HubStats> {
        self.stats.subscribe()
    }

    /// Set up `chain`, deliver datagrams from `source`, then tear down
    ///
    /// Requires a bound hub. For playback sources the options, the executable
    /// and the capture are checked before any processor is set up. Every exit path
    /// goes through [`close`](Self::close).
    pub async fn run(&mut self, chain: ProcessorChain, source: Source, cancel: CancellationToken) -> Result<HubExit> {
        if self.state != HubState::Bound {
            return Err(GseError::InvalidState { from: self.state.as_str(), to: HubState::Active.as_str() });
        }
        let socket = match &self.socket {
            Some(socket) => socket.clone(),
            None => return Err(GseError::InvalidState { from: "unbound", to: HubState::Active.as_str() }),
        };

        if let Source::Playback { controller, capture, options } = &source {
            options.validate()?;
            controller.resolve_executable()?;
            if !capture.is_file() {
                return Err(GseError::file_error(
                    capture.clone(),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "capture file not found"),
                ));
            }
        }

        self.state.advance(HubState::Active)?;
        let chain = self.chain.insert(chain);
        if let Err(e) = chain.setup_all(socket.clone()).await {
            self.close().await?;
            return Err(e);
        }

        let result = match source {
            Source::Live => self.run_live(&socket, &cancel).await,
            Source::Playback { controller, capture, mut options } => {
                if options.port.is_none() {
                    options.port = Some(socket.local_addr()?.port());
                }
                self.run_playback(&socket, &cancel, &controller, capture, &options).await
            }
        };
        drop(socket);

        let closed = self.close().await;
        let exit = result?;
        closed?;
        Ok(exit)
    }

    async fn run_live(&mut self, socket: &UdpSocket, cancel: &CancellationToken) -> Result<HubExit> {
        info!("Hub receiving live datagrams");
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Hub cancelled");
                    return Ok(HubExit::Cancelled);
                }
                received = recv_packet(socket, &mut buf) => self.on_received(received)?,
            }
        }
    }

    async fn run_playback(
        &mut self,
        socket: &UdpSocket,
        cancel: &CancellationToken,
        controller: &PlaybackController,
        capture: PathBuf,
        options: &PlaybackOptions,
    ) -> Result<HubExit> {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        // Keep receiving while the replay binary runs
        let outcome = {
            let playback = controller.run(&capture, options);
            tokio::pin!(playback);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Hub cancelled during playback");
                        return Ok(HubExit::Cancelled);
                    }
                    outcome = &mut playback => break outcome?,
                    received = recv_packet(socket, &mut buf) => self.on_received(received)?,
                }
            }
        };

        // Grace period for datagrams still in flight
        debug!("Playback done, receiving for {:?} more", self.config.grace_period);
        let grace = tokio::time::sleep(self.config.grace_period);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(HubExit::Cancelled),
                _ = &mut grace => return Ok(HubExit::PlaybackComplete(outcome)),
                received = recv_packet(socket, &mut buf) => self.on_received(received)?,
            }
        }
    }

    fn on_received(&mut self, received: std::io::Result<Packet>) -> Result<()> {
        match received {
            Ok(packet) => {
                self.deliver(&packet);
                Ok(())
            }
            // ICMP feedback from a previous send, reported on some platforms
            Err(e) if matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionReset
            ) =>
            {
                warn!("Ignoring socket error: {}", e);
                Ok(())
            }
            Err(e) => {
                warn!("Socket receive failed: {}", e);
                Err(GseError::Io(e))
            }
        }
    }

    /// Count `packet` and hand it to every processor in order.
    fn deliver(&mut self, packet: &Packet) {
        let short = !packet.has_full_header();
        let crc_failed = !short && !packet.crc_valid();
        if short {
            debug!("Short datagram ({} bytes)", packet.len());
        } else {
            trace!(device = ?packet.device_id(), len = packet.len(), "datagram");
        }

        let failures = match self.chain.as_mut() {
            Some(chain) => chain.deliver(packet),
            None => 0,
        };

        self.stats.send_modify(|stats| {
            stats.datagrams += 1;
            stats.bytes += packet.len() as u64;
            stats.short_packets += u64::from(short);
            stats.crc_failures += u64::from(crc_failed);
            stats.processor_errors += failures as u64;
        });
    }

    /// Close every processor once, in order, then drop the socket
    ///
    /// `Active -> Draining -> Closed`. A closed hub stays closed and further
    /// calls are no-ops. Closing a hub that never ran is an invalid
    /// transition.
    pub async fn close(&mut self) -> Result<()> {
        match self.state {
            HubState::Closed => return Ok(()),
            HubState::Active => self.state.advance(HubState::Draining)?,
            HubState::Draining => {}
            HubState::Idle | HubState::Bound => {
                return Err(GseError::InvalidState {
                    from: self.state.as_str(),
                    to: HubState::Draining.as_str(),
                });
            }
        }

        let closed = match self.chain.as_mut() {
            Some(chain) => chain.close_all().await,
            None => Ok(()),
        };
        self.chain = None;
        self.socket = None;
        self.state.advance(HubState::Closed)?;

        let stats = self.stats();
        info!(
            "Hub closed: {} datagrams, {} bytes, {} short, {} crc failures, {} processor errors",
            stats.datagrams, stats.bytes, stats.short_packets, stats.crc_failures, stats.processor_errors
        );
        closed
    }
}

impl std::fmt::Debug for DatagramHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramHub")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("stats", &self.stats())
            .finish()
    }
}

async fn recv_packet(socket: &UdpSocket, buf: &mut [u8]) -> std::io::Result<Packet> {
    let (len, _peer) = socket.recv_from(buf).await?;
    Ok(Packet::from(&buf[..len]))
}
