//! Infrastructure layer: job execution, storage, configuration.

pub mod config;
pub mod jobs;

pub use config::{ConfigError, PipelineConfig};
