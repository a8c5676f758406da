use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::parser::SchemaMismatch;

/// Conditions that end a run without completing it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to open log file {path}: {source}")]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open audit file {path}: {source}")]
    AuditOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to flush audit file {path}: {source}")]
    AuditFlush {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read line {line_number}: {source}")]
    Read {
        line_number: u64,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    SchemaMismatch(#[from] SchemaMismatch),

    #[error("pipeline is already processing a file")]
    AlreadyRunning,

    #[error("worker thread failed: {0}")]
    Worker(String),

    #[error("pipeline cancelled")]
    Cancelled,
}
