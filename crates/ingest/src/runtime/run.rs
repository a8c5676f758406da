//! Run: process each file as a job and report its record.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};

use super::cli::Cli;
use crate::conf::IngestConfig;
use crate::job::JobRecord;
use crate::pipeline::Pipeline;
use crate::sink::BulkLoadTarget;

/// Totals over all files of one invocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

/// Process every file on the command line in order. Stops starting new
/// files once `cancel` fires; remaining files count as skipped.
pub async fn run_jobs(
    cli: &Cli,
    config: &IngestConfig,
    sink: Arc<dyn BulkLoadTarget>,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    for (index, path) in cli.files.iter().enumerate() {
        if cancel.is_cancelled() {
            warn!(path = %path.display(), "skipping file after cancellation");
            summary.skipped += 1;
            continue;
        }

        let mut job = match JobRecord::for_file(index as u64 + 1, path) {
            Ok(job) => job,
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot stat log file");
                summary.failed += 1;
                continue;
            }
        };
        job.start()?;

        let span = info_span!("job", id = job.id, file = %job.name);
        let pipeline = Pipeline::new(config.pipeline.clone(), sink.clone())
            .with_cancellation(cancel.clone())
            .with_span(span);
        let audit = cli.audit_path(path, &config.pipeline.audit_suffix);

        let started = Instant::now();
        match pipeline.process(path, &audit).await {
            Ok(report) => {
                job.complete(&report, started.elapsed())?;
                info!(
                    id = job.id,
                    file = %job.name,
                    records = report.metrics.total_records,
                    failed_writes = report.metrics.failed_writes,
                    "job completed"
                );
                summary.completed += 1;
            }
            Err(e) => {
                job.fail(&e, started.elapsed())?;
                summary.failed += 1;
            }
        }

        println!("{}", serde_json::to_string(&job)?);
    }

    Ok(summary)
}

/// Resolves once Ctrl-C or SIGTERM is received.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("Received Ctrl+C, cancelling ingestion"),
        _ = terminate => warn!("Received SIGTERM, cancelling ingestion"),
    }
}
