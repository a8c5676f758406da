//! Combine stage: fan-in from the record queue into batches.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use tokio::runtime::Handle;
use tracing::{debug, error};

use super::metrics::BatchTally;
use super::queue::{self, Halt};
use super::PipelineMetrics;
use crate::audit::AuditWriter;
use crate::parser::LogRecord;
use crate::sink::{BulkLoader, SinkError};

pub(crate) struct Batcher {
    pub id: usize,
    pub records: Receiver<LogRecord>,
    pub stop: Receiver<()>,
    pub loader: Arc<BulkLoader>,
    pub audit: Arc<AuditWriter>,
    pub metrics: Arc<PipelineMetrics>,
    pub capacity: usize,
    pub runtime: Handle,
}

impl Batcher {
    /// Run until the record queue closes (final partial batch is flushed)
    /// or the stop signal trips (pending batch is discarded).
    ///
    /// Returns true if the stop signal or a cancelled load cut the run short.
    pub(crate) fn run(self) -> bool {
        let mut tally = BatchTally::default();
        let mut batch: Vec<LogRecord> = Vec::with_capacity(self.capacity);
        let mut stopped = false;

        loop {
            match queue::recv(&self.records, &self.stop) {
                Ok(record) => {
                    self.metrics.record_seen();
                    tally.observe(&record.status, &record.timestamp());

                    if let Err(e) = self.audit.append(&record) {
                        self.metrics.record_failure(1);
                        self.metrics.set_last_error(format!("audit write failed: {}", e));
                        error!(
                            worker = self.id,
                            line_number = record.line_number,
                            path = %self.audit.path().display(),
                            error = %e,
                            "failed to write audit line"
                        );
                        continue;
                    }

                    batch.push(record);
                    if batch.len() >= self.capacity && !self.flush(&mut batch) {
                        stopped = true;
                    }
                }
                Err(Halt::Closed) => {
                    if !batch.is_empty() && !self.flush(&mut batch) {
                        stopped = true;
                    }
                    break;
                }
                Err(Halt::Stopped) => {
                    self.metrics.record_discarded(batch.len() as u64);
                    batch.clear();
                    stopped = true;
                    break;
                }
            }
        }

        debug!(worker = self.id, stopped, "batcher finished");
        self.metrics.merge_batch(tally);
        stopped
    }

    /// Load and clear `batch`. Returns false if the load was cancelled.
    fn flush(&self, batch: &mut Vec<LogRecord>) -> bool {
        self.metrics.record_batch();
        let (inserted, err) = self.runtime.block_on(self.loader.load(batch));
        batch.clear();
        match err {
            None => {
                debug!(worker = self.id, rows = inserted, "batch flushed");
                true
            }
            Some(SinkError::Cancelled) => false,
            Some(_) => true,
        }
    }
}
