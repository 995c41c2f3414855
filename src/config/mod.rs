//! Pipeline configuration.
//!
//! Configuration is loaded from YAML into [`PipelineConfig`], then validated
//! against the environment ([`GseEnv`]) into a [`ValidatedPipeline`] holding
//! tagged [`ProcessorConfig`]s. Validation reports every problem at once and
//! opens nothing; files, ports and pseudo-terminals are only touched by
//! [`ValidatedPipeline::build_chain`].
//!
//! ## Usage Example
//!
//! ```rust
//! use gse_relay::config::{GseEnv, PipelineConfig};
//!
//! let yaml = r#"
//! listen: { address: 127.0.0.1, port: 20501 }
//! processors:
//!   - kind: forward
//!     address: 127.0.0.1
//!     port: 30000
//!   - kind: tally
//! "#;
//!
//! let pipeline = PipelineConfig::from_yaml_str(yaml)?.validate(&GseEnv::default())?;
//! assert_eq!(pipeline.processors.len(), 2);
//! # Ok::<(), gse_relay::GseError>(())
//! ```

mod env;
mod pipeline;
mod processor;

pub use env::{CAPTURE_DIR_VAR, GseEnv, PLAYBACK_VAR, SERIAL_DIR_VAR};
pub use pipeline::{
    ListenConfig, PipelineConfig, PipelineHandles, PlaybackConfig, PlaybackPlan, ProcessorSpec,
    ValidatedPipeline,
};
pub use processor::{ProcessorConfig, parse_target};
