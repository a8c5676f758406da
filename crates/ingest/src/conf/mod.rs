//! Conf module: configuration model and loading.

pub mod load;
pub mod model;

pub use load::ConfigError;
pub use model::{DatabaseConfig, IngestConfig, LogFormat, LoggingConfig, PipelineConfig, SinkConfig, SinkKind};
