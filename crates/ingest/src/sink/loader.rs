use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{BulkLoadTarget, SinkError};
use crate::parser::LogRecord;
use crate::pipeline::PipelineMetrics;

/// How often a failed batch is re-submitted.
///
/// The default never retries, so each batch reaches the store at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Submits batches to a target and records the outcome in the run metrics.
pub struct BulkLoader {
    target: Arc<dyn BulkLoadTarget>,
    metrics: Arc<PipelineMetrics>,
    cancel: CancellationToken,
    retry: RetryPolicy,
}

impl BulkLoader {
    pub fn new(
        target: Arc<dyn BulkLoadTarget>,
        metrics: Arc<PipelineMetrics>,
        cancel: CancellationToken,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            target,
            metrics,
            cancel,
            retry,
        }
    }

    /// Load one batch. Never fails the pipeline; the error is returned for
    /// the caller's information only.
    ///
    /// A failed batch adds its full size to `failed_writes`. A batch cut
    /// short by cancellation is counted as discarded.
    pub async fn load(&self, batch: &[LogRecord]) -> (u64, Option<SinkError>) {
        let size = batch.len() as u64;
        let started = Instant::now();
        let outcome = self.load_with_retry(batch).await;
        self.metrics.record_insert_time(started.elapsed());

        match outcome {
            Ok(inserted) => {
                self.metrics.record_success(inserted);
                debug!(target_name = self.target.name(), rows = inserted, "batch committed");
                (inserted, None)
            }
            Err(SinkError::Cancelled) => {
                self.metrics.record_discarded(size);
                debug!(rows = size, "batch discarded on cancellation");
                (0, Some(SinkError::Cancelled))
            }
            Err(e) => {
                self.metrics.record_failure(size);
                self.metrics.set_last_error(&e);
                error!(target_name = self.target.name(), rows = size, error = %e, "failed to load batch");
                (0, Some(e))
            }
        }
    }

    async fn load_with_retry(&self, batch: &[LogRecord]) -> Result<u64, SinkError> {
        let mut attempt: u32 = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(SinkError::Cancelled),
                r = self.target.load_batch(batch) => r,
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(attempt, max_retries = self.retry.max_retries, error = %e, "retrying batch");
                    let wait = self.retry.backoff * attempt;
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(SinkError::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    fn rows(n: usize) -> Vec<LogRecord> {
        (0..n)
            .map(|i| {
                let line = format!(
                    "2023-10-10 12:00:0{} 10.0.0.1 GET /p{} - 80 - 10.0.0.2 agent 200 0 0 5",
                    i % 10,
                    i
                );
                let tokens: Vec<&str> = line.split(' ').collect();
                LogRecord::from_tokens(&tokens, i as u64 + 1).unwrap()
            })
            .collect()
    }

    fn loader(sink: Arc<MemorySink>, retry: RetryPolicy) -> (BulkLoader, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        let loader = BulkLoader::new(sink, Arc::clone(&metrics), CancellationToken::new(), retry);
        (loader, metrics)
    }

    #[tokio::test]
    async fn test_successful_load_counts_rows() {
        let sink = Arc::new(MemorySink::new());
        let (loader, metrics) = loader(Arc::clone(&sink), RetryPolicy::default());

        let (inserted, err) = loader.load(&rows(3)).await;
        assert_eq!(inserted, 3);
        assert!(err.is_none());
        assert_eq!(metrics.snapshot().successful_writes, 3);
        assert_eq!(sink.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_load_counts_whole_batch() {
        let sink = Arc::new(MemorySink::new().fail_first(1));
        let (loader, metrics) = loader(Arc::clone(&sink), RetryPolicy::default());

        let (inserted, err) = loader.load(&rows(4)).await;
        assert_eq!(inserted, 0);
        assert!(matches!(err, Some(SinkError::Connection(_))));

        let snap = metrics.snapshot();
        assert_eq!(snap.failed_writes, 4);
        assert_eq!(snap.successful_writes, 0);
        assert!(snap.last_error.is_some());
        assert_eq!(sink.len(), 0);
        assert_eq!(sink.attempts(), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_batch() {
        let sink = Arc::new(MemorySink::new().fail_first(2));
        let retry = RetryPolicy {
            max_retries: 2,
            backoff: Duration::from_millis(1),
        };
        let (loader, metrics) = loader(Arc::clone(&sink), retry);

        let (inserted, err) = loader.load(&rows(2)).await;
        assert_eq!(inserted, 2);
        assert!(err.is_none());
        assert_eq!(sink.attempts(), 3);
        assert_eq!(metrics.snapshot().failed_writes, 0);
    }

    #[tokio::test]
    async fn test_permanent_rejection_is_not_retried() {
        let sink = Arc::new(MemorySink::new().fail_when(|_| true));
        let retry = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(1),
        };
        let (loader, metrics) = loader(Arc::clone(&sink), retry);

        let (inserted, err) = loader.load(&rows(2)).await;
        assert_eq!(inserted, 0);
        assert!(matches!(err, Some(SinkError::Rejected(_))));
        assert_eq!(sink.attempts(), 1);
        assert_eq!(metrics.snapshot().failed_writes, 2);
    }

    #[tokio::test]
    async fn test_cancelled_load_is_discarded() {
        let sink = Arc::new(MemorySink::new());
        let metrics = Arc::new(PipelineMetrics::new());
        let token = CancellationToken::new();
        token.cancel();
        let loader = BulkLoader::new(sink.clone(), Arc::clone(&metrics), token, RetryPolicy::default());

        let (inserted, err) = loader.load(&rows(5)).await;
        assert_eq!(inserted, 0);
        assert!(matches!(err, Some(SinkError::Cancelled)));

        let snap = metrics.snapshot();
        assert_eq!(snap.discarded_records, 5);
        assert_eq!(snap.failed_writes, 0);
        assert_eq!(sink.len(), 0);
    }
}
