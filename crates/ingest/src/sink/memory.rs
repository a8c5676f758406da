use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BulkLoadTarget, SinkError};
use crate::parser::LogRecord;

type BatchPredicate = Box<dyn Fn(&[LogRecord]) -> bool + Send + Sync>;

/// In-memory target for dry runs and tests.
///
/// Batches are staged and only appended to the committed rows once the
/// whole batch has been accepted, so a rejected batch leaves no rows behind.
pub struct MemorySink {
    committed: Mutex<Vec<LogRecord>>,
    attempts: AtomicU64,
    fail_first: u64,
    fail_when: Option<BatchPredicate>,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            committed: Mutex::new(Vec::new()),
            attempts: AtomicU64::new(0),
            fail_first: 0,
            fail_when: None,
        }
    }

    /// Fail the first `n` load attempts with a connection error.
    pub fn fail_first(mut self, n: u64) -> Self {
        self.fail_first = n;
        self
    }

    /// Reject every batch for which `predicate` returns true.
    pub fn fail_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&[LogRecord]) -> bool + Send + Sync + 'static,
    {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    pub fn rows(&self) -> Vec<LogRecord> {
        self.committed.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.committed.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `load_batch` calls, successful or not.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BulkLoadTarget for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load_batch(&self, rows: &[LogRecord]) -> Result<u64, SinkError> {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if attempt <= self.fail_first {
            return Err(SinkError::Connection(format!("injected failure on attempt {}", attempt)));
        }

        let staged = rows.to_vec();
        if let Some(predicate) = &self.fail_when {
            if predicate(&staged) {
                return Err(SinkError::Rejected(format!(
                    "batch of {} rows refused",
                    staged.len()
                )));
            }
        }

        let inserted = staged.len() as u64;
        self.committed.lock().extend(staged);
        Ok(inserted)
    }
}

/// Accepts every batch and keeps nothing. Used when only the audit file is
/// wanted.
#[derive(Debug, Default)]
pub struct DiscardSink;

#[async_trait]
impl BulkLoadTarget for DiscardSink {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn load_batch(&self, rows: &[LogRecord]) -> Result<u64, SinkError> {
        Ok(rows.len() as u64)
    }
}
