//! Infrastructure layer: resilience, saga orchestration, storage, pipeline
//! stages and the consumers that run them.

pub mod config;
pub mod locks;
pub mod pipeline;
pub mod repository;
pub mod resilience;
pub mod saga;
pub mod stages;
pub mod workers;

pub use config::{ConfigError, PipelineConfig};
pub use pipeline::{Pipeline, PipelineStores, StartupError};
