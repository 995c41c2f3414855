//! Assemble a validated pipeline into a running hub

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::chain::ProcessorChain;
use crate::config::{PipelineHandles, PlaybackPlan, ValidatedPipeline};
use crate::hub::{DatagramHub, HubExit, HubStats, Source};

/// What a finished pipeline reports back.
#[derive(Debug)]
pub struct PipelineReport {
    pub exit: HubExit,
    pub stats: HubStats,
    pub handles: PipelineHandles,
}

/// A bound hub with its processors built but not yet set up.
///
/// Splitting assembly from running lets callers read the bound address and
/// the pseudo-terminal paths before any datagram flows.
pub struct Pipeline {
    hub: DatagramHub,
    chain: ProcessorChain,
    playback: Option<PlaybackPlan>,
    handles: PipelineHandles,
}

impl Pipeline {
    /// Bind the hub, then open every processor's resources.
    pub async fn assemble(mut validated: ValidatedPipeline) -> Result<Self> {
        let mut hub = DatagramHub::new(validated.hub.clone());
        hub.bind().await?;
        let (chain, handles) = validated.build_chain()?;
        info!(processors = ?chain.names(), "Pipeline assembled");

        Ok(Self { hub, chain, playback: validated.playback, handles })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.hub.local_addr()
    }

    pub fn handles(&self) -> &PipelineHandles {
        &self.handles
    }

    /// Run until cancelled, or until playback completes.
    pub async fn run(self, cancel: CancellationToken) -> Result<PipelineReport> {
        let Self { mut hub, chain, playback, handles } = self;
        let source = match playback {
            Some(PlaybackPlan { controller, capture, options }) => Source::Playback { controller, capture, options },
            None => Source::Live,
        };

        let exit = hub.run(chain, source, cancel).await?;
        Ok(PipelineReport { exit, stats: hub.stats(), handles })
    }
}

/// Assemble and run `validated` in one step.
pub async fn run_pipeline(validated: ValidatedPipeline, cancel: CancellationToken) -> Result<PipelineReport> {
    Pipeline::assemble(validated).await?.run(cancel).await
}
