// Domain-driven module structure for the ingest pipeline.

// Core pipeline
pub mod parser;
pub mod pipeline;
pub mod sink;
pub mod audit;

// Domain modules
pub mod conf;
pub mod job;
pub mod runtime;

pub use pipeline::{process_log_file, Pipeline, PipelineError, PipelineReport};
