use std::path::{Path, PathBuf};

use clap::Parser;

use crate::audit::default_audit_path;
use crate::conf::{IngestConfig, LogFormat, SinkKind};

/// Bulk-load W3C extended (IIS) access logs into PostgreSQL.
///
/// Each file is parsed by a pool of workers, written to an audit file
/// and loaded in batches. Job records are printed to stdout as JSON.
#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log files to ingest, processed one after another
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Parse workers (batchers get half, at least one)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Records per bulk-load transaction
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Load target: postgres or none (audit file only)
    #[arg(long)]
    pub sink: Option<SinkKind>,

    /// Extra attempts for a failed batch
    #[arg(long)]
    pub load_retries: Option<u32>,

    /// Write audit files here instead of next to each source file
    #[arg(long)]
    pub audit_dir: Option<PathBuf>,

    /// Log output format: text or json
    #[arg(long)]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Command-line flags take priority over file and environment.
    pub fn apply(&self, config: &mut IngestConfig) {
        if let Some(workers) = self.workers {
            config.pipeline.workers = workers;
        }
        if let Some(batch_size) = self.batch_size {
            config.pipeline.batch_size = batch_size;
        }
        if let Some(sink) = self.sink {
            config.sink.kind = sink;
        }
        if let Some(retries) = self.load_retries {
            config.pipeline.load_retries = retries;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }

    pub fn audit_path(&self, source: &Path, suffix: &str) -> PathBuf {
        match (&self.audit_dir, source.file_name()) {
            (Some(dir), Some(name)) => default_audit_path(&dir.join(name), suffix),
            _ => default_audit_path(source, suffix),
        }
    }
}
