//! Pipeline orchestrator.
//!
//! One run moves a single log file through four stages connected by
//! zero-capacity queues:
//!
//! ```text
//! reader --lines--> parse x P --records--> batch x C --> bulk loader
//!                        \
//!                         +--errors--> error sink
//! ```
//!
//! Shutdown is ordered. The reader drops the line queue at end of input;
//! joining the parse workers drops the record and error queues; batchers
//! and the error sink are joined next; the audit file is flushed last.

pub(crate) mod combine;
pub mod error;
pub mod errors;
pub mod metrics;
pub(crate) mod parse;
pub(crate) mod queue;
pub mod reader;
pub mod report;
pub mod state;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Span};

pub use error::PipelineError;
pub use errors::{ErrorSinkTally, StageError};
pub use metrics::{MetricsSnapshot, PipelineMetrics, TimeBounds};
pub use reader::SourceLine;
pub use report::{status_table, PipelineReport};
pub use state::PipelineState;

use crate::audit::{default_audit_path, AuditWriter};
use crate::conf::PipelineConfig;
use crate::parser::LogRecord;
use crate::sink::{BulkLoadTarget, BulkLoader};
use combine::Batcher;
use errors::run_error_sink;
use parse::ParseWorker;
use queue::StopSignal;
use reader::{read_lines, ReadEnd};
use state::AbortFlag;

/// Process one file with `worker_count` parse workers and
/// `max(1, worker_count / 2)` batchers, writing the audit trail to
/// `audit_path`.
pub async fn process_log_file(
    path: impl AsRef<Path>,
    worker_count: usize,
    sink: Arc<dyn BulkLoadTarget>,
    audit_path: impl AsRef<Path>,
) -> Result<PipelineReport, PipelineError> {
    Pipeline::new(PipelineConfig::with_workers(worker_count), sink)
        .process(path, audit_path)
        .await
}

/// Reusable pipeline bound to one sink. Runs one file at a time.
pub struct Pipeline {
    config: PipelineConfig,
    sink: Arc<dyn BulkLoadTarget>,
    cancel: CancellationToken,
    span: Span,
    state: Arc<Mutex<PipelineState>>,
    running: AtomicBool,
    live_metrics: Mutex<Option<Arc<PipelineMetrics>>>,
    last_metrics: Mutex<Option<MetricsSnapshot>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, sink: Arc<dyn BulkLoadTarget>) -> Self {
        Self {
            config,
            sink,
            cancel: CancellationToken::new(),
            span: Span::current(),
            state: Arc::new(Mutex::new(PipelineState::Idle)),
            running: AtomicBool::new(false),
            live_metrics: Mutex::new(None),
            last_metrics: Mutex::new(None),
        }
    }

    /// Stop runs when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Parent span for every log event emitted by a run.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    /// Metrics of the most recent run, including runs that failed.
    pub fn last_metrics(&self) -> Option<MetricsSnapshot> {
        self.last_metrics.lock().clone()
    }

    /// Snapshot of the run in progress, or of the last run when idle.
    ///
    /// Counters of a live run only grow. Parse-stage totals are merged when
    /// the parse workers exit, so they lag behind until the run drains.
    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        if let Some(live) = self.live_metrics.lock().as_ref() {
            return Some(live.snapshot());
        }
        self.last_metrics()
    }

    /// `<source><audit_suffix>`, e.g. `u_ex231010.log_parsed_logs.txt`.
    pub fn audit_path_for(&self, source: impl AsRef<Path>) -> PathBuf {
        default_audit_path(source.as_ref(), &self.config.audit_suffix)
    }

    /// Run the file at `source` to completion.
    ///
    /// Returns an error for fatal conditions only: invalid configuration,
    /// an unreadable source or audit file, an unsupported `#Fields:`
    /// layout, a worker panic, or cancellation. Rejected lines and failed
    /// batches are counted in the report instead.
    pub async fn process(
        &self,
        source: impl AsRef<Path>,
        audit_path: impl AsRef<Path>,
    ) -> Result<PipelineReport, PipelineError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(PipelineError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);
        *self.state.lock() = PipelineState::Idle;

        let source = source.as_ref().to_path_buf();
        let audit_path = audit_path.as_ref().to_path_buf();

        let result = self.run(&source, &audit_path).await;
        let final_state = match &result {
            Ok(_) => PipelineState::Done,
            Err(PipelineError::Cancelled) => PipelineState::Cancelled,
            Err(_) => PipelineState::Aborted,
        };
        *self.state.lock() = final_state;

        match &result {
            Ok(report) => {
                info!(
                    parent: &self.span,
                    path = %source.display(),
                    total_lines = report.metrics.lines_read,
                    lines_per_second = %format!("{:.2}", report.metrics.lines_per_second),
                    "Finished processing log file"
                );
            }
            Err(e) => {
                error!(parent: &self.span, path = %source.display(), state = %final_state, error = %e, "log file processing failed");
            }
        }
        result
    }

    async fn run(&self, source: &Path, audit_path: &Path) -> Result<PipelineReport, PipelineError> {
        self.config.validate().map_err(PipelineError::InvalidConfig)?;
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let file = File::open(source).map_err(|e| PipelineError::SourceOpen {
            path: source.to_path_buf(),
            source: e,
        })?;
        let audit = AuditWriter::create(audit_path, self.config.audit_line_numbers).map_err(|e| {
            PipelineError::AuditOpen {
                path: audit_path.to_path_buf(),
                source: e,
            }
        })?;

        let metrics = Arc::new(PipelineMetrics::new());
        let stop = Arc::new(StopSignal::new());
        let abort = Arc::new(AbortFlag::default());
        let loader = Arc::new(BulkLoader::new(
            Arc::clone(&self.sink),
            Arc::clone(&metrics),
            self.cancel.clone(),
            self.config.retry_policy(),
        ));

        info!(
            parent: &self.span,
            path = %source.display(),
            audit = %audit_path.display(),
            sink = self.sink.name(),
            parse_workers = self.config.parse_workers(),
            batch_workers = self.config.batch_workers(),
            batch_size = self.config.batch_size,
            "processing log file"
        );

        let run = Run {
            config: self.config.clone(),
            file,
            audit: Arc::new(audit),
            metrics: Arc::clone(&metrics),
            loader,
            stop: Arc::clone(&stop),
            abort: Arc::clone(&abort),
            state: Arc::clone(&self.state),
            span: self.span.clone(),
            runtime: Handle::current(),
        };

        *self.live_metrics.lock() = Some(Arc::clone(&metrics));
        let bridge = {
            let token = self.cancel.clone();
            let stop = Arc::clone(&stop);
            tokio::spawn(async move {
                token.cancelled().await;
                stop.trip();
            })
        };
        let joined = tokio::task::spawn_blocking(move || run.execute()).await;
        bridge.abort();

        let snapshot = metrics.snapshot();
        *self.last_metrics.lock() = Some(snapshot.clone());
        *self.live_metrics.lock() = None;
        snapshot.log_summary("process_log_file");
        if !snapshot.status_counts.is_empty() {
            info!(parent: &self.span, "status codes:\n{}", status_table(&snapshot.status_counts));
        }

        let outcome = joined.map_err(|e| PipelineError::Worker(format!("pipeline task failed: {e}")))??;

        if let Some(fatal) = abort.take() {
            return Err(fatal);
        }
        if outcome.cancelled {
            return Err(PipelineError::Cancelled);
        }

        Ok(PipelineReport {
            source: source.to_path_buf(),
            audit_path: audit_path.to_path_buf(),
            parse_workers: self.config.parse_workers(),
            batch_workers: self.config.batch_workers(),
            state: PipelineState::Done,
            errors: outcome.errors,
            metrics: snapshot,
        })
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Everything one run owns, moved onto a blocking thread.
struct Run {
    config: PipelineConfig,
    file: File,
    audit: Arc<AuditWriter>,
    metrics: Arc<PipelineMetrics>,
    loader: Arc<BulkLoader>,
    stop: Arc<StopSignal>,
    abort: Arc<AbortFlag>,
    state: Arc<Mutex<PipelineState>>,
    span: Span,
    runtime: Handle,
}

struct RunOutcome {
    errors: ErrorSinkTally,
    cancelled: bool,
}

impl Run {
    fn execute(self) -> Result<RunOutcome, PipelineError> {
        let Run {
            config,
            file,
            audit,
            metrics,
            loader,
            stop,
            abort,
            state,
            span,
            runtime,
        } = self;
        let _entered = span.enter();

        let (line_tx, line_rx) = queue::rendezvous::<SourceLine>();
        let (record_tx, record_rx) = queue::rendezvous::<LogRecord>();
        let (error_tx, error_rx) = queue::rendezvous::<StageError>();

        let error_sink = {
            let metrics = Arc::clone(&metrics);
            spawn_worker("error-sink".to_string(), &span, move || run_error_sink(error_rx, metrics))?
        };

        let mut parsers = Vec::with_capacity(config.parse_workers());
        for id in 0..config.parse_workers() {
            let worker = ParseWorker {
                id,
                lines: line_rx.clone(),
                records: record_tx.clone(),
                errors: error_tx.clone(),
                stop: stop.listener(),
                abort: Arc::clone(&abort),
                metrics: Arc::clone(&metrics),
            };
            parsers.push(spawn_worker(format!("parse-{id}"), &span, move || worker.run())?);
        }
        drop(line_rx);
        drop(record_tx);
        drop(error_tx);

        let mut batchers = Vec::with_capacity(config.batch_workers());
        for id in 0..config.batch_workers() {
            let batcher = Batcher {
                id,
                records: record_rx.clone(),
                stop: stop.listener(),
                loader: Arc::clone(&loader),
                audit: Arc::clone(&audit),
                metrics: Arc::clone(&metrics),
                capacity: config.batch_size,
                runtime: runtime.clone(),
            };
            batchers.push(spawn_worker(format!("batch-{id}"), &span, move || batcher.run())?);
        }
        drop(record_rx);

        *state.lock() = PipelineState::Reading;
        let end = read_lines(BufReader::new(file), line_tx, &stop.listener(), &abort, &metrics);

        *state.lock() = PipelineState::Draining;
        debug!(?end, "draining pipeline");

        let mut panicked = Vec::new();
        let parsers_stopped = join_all(parsers, &mut panicked);
        let batchers_stopped = join_all(batchers, &mut panicked);
        let errors = match error_sink.join() {
            Ok(tally) => tally,
            Err(_) => {
                panicked.push("error-sink".to_string());
                ErrorSinkTally::default()
            }
        };
        // A stop that lands after every stage drained leaves the run complete.
        let cancelled = end == ReadEnd::Stopped
            || parsers_stopped.into_iter().any(|stopped| stopped)
            || batchers_stopped.into_iter().any(|stopped| stopped);

        audit.flush().map_err(|e| PipelineError::AuditFlush {
            path: audit.path().to_path_buf(),
            source: e,
        })?;

        if !panicked.is_empty() {
            return Err(PipelineError::Worker(format!(
                "worker threads panicked: {}",
                panicked.join(", ")
            )));
        }
        Ok(RunOutcome { errors, cancelled })
    }
}

fn spawn_worker<T, F>(name: String, parent: &Span, f: F) -> Result<JoinHandle<T>, PipelineError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let span = tracing::info_span!(parent: parent, "worker", name = %name);
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let _entered = span.enter();
            f()
        })
        .map_err(|e| PipelineError::Worker(format!("failed to spawn {name}: {e}")))
}

/// Join every handle, collecting the results of workers that returned.
fn join_all<T>(handles: Vec<JoinHandle<T>>, panicked: &mut Vec<String>) -> Vec<T> {
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let name = handle.thread().name().unwrap_or("worker").to_string();
        match handle.join() {
            Ok(result) => results.push(result),
            Err(_) => {
                error!(worker = %name, "worker thread panicked");
                panicked.push(name);
            }
        }
    }
    results
}
