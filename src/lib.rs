//! Ground support relay for balloon instrument telemetry.
//!
//! The flight computer downlinks instrument data as UDP datagrams, each tagged
//! with a device id. This crate receives those datagrams on one socket and
//! fans every one of them out to a chain of processors: forward to another
//! host, relay to a serial line, record to per-device files, expose through
//! pseudo-terminals, or simply count. Recorded captures are replayed through
//! the same path by an external playback binary.
//!
//! The second half of the crate recovers instrument frames from raw byte
//! streams (serial lines or capture files), resynchronizing past corruption
//! one byte at a time.
//!
//! # Features
//!
//! - **Datagram hub**: one socket, ordered delivery, isolated processor failures
//! - **Write lanes**: serial and file writes never stall the receive loop
//! - **Frame extraction**: chunking-independent imager and spectrometer framing
//! - **Configuration**: YAML pipelines validated before anything is opened
//!
//! ## Example (live relay)
//!
//! ```rust,no_run
//! use gse_relay::config::{GseEnv, PipelineConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let yaml = std::fs::read_to_string("relay.yaml")?;
//!     let pipeline = PipelineConfig::from_yaml_str(&yaml)?.validate(&GseEnv::from_env())?;
//!
//!     let cancel = CancellationToken::new();
//!     let report = gse_relay::run_pipeline(pipeline, cancel).await?;
//!     println!("{:?}", report.stats);
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Frame recovery
pub mod extract;
pub mod reader;

// Datagram relay
pub mod chain;
pub mod hub;
pub mod playback;
pub mod processor;
pub mod processors;

// Assembly
pub mod config;
mod runner;

pub use error::*;
pub use runner::{Pipeline, PipelineReport, run_pipeline};
