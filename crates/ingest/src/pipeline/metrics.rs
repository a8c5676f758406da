use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// Forces the wrapped counter group onto its own cache line.
///
/// Parse workers and batchers hammer different groups concurrently, so each
/// group gets a 64-byte aligned slot to avoid false sharing.
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct CacheAligned<T>(pub T);

/// Line accounting, written by the reader and the parse stage.
#[derive(Debug, Default)]
pub struct LineMetrics {
    pub read: AtomicU64,
    pub skipped: AtomicU64,
    pub rejected: AtomicU64,
    pub delivered: AtomicU64,
    /// Lines whose parse failed unexpectedly (parser panic).
    pub errored: AtomicU64,
    /// Lines decoded lossily because they were not valid UTF-8.
    pub non_utf8: AtomicU64,
}

/// Record and write accounting, written by the combine stage.
#[derive(Debug, Default)]
pub struct WriteMetrics {
    /// Records received by batchers.
    pub total_records: AtomicU64,
    pub successful: AtomicU64,
    pub failed: AtomicU64,
    /// Records dropped because the run was cancelled mid-flight.
    pub discarded: AtomicU64,
    pub batches: AtomicU64,
}

#[derive(Debug, Default)]
pub struct TimingMetrics {
    pub parse_nanos: AtomicU64,
    pub insert_nanos: AtomicU64,
}

/// Earliest and latest `date time` values observed, compared as text.
///
/// The W3C `date time` layout is fixed width, so lexical order is
/// chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeBounds {
    pub first: String,
    pub last: String,
}

impl TimeBounds {
    pub fn observe(bounds: &mut Option<TimeBounds>, stamp: &str) {
        match bounds {
            Some(b) => {
                if stamp < b.first.as_str() {
                    b.first = stamp.to_string();
                }
                if stamp > b.last.as_str() {
                    b.last = stamp.to_string();
                }
            }
            None => {
                *bounds = Some(TimeBounds {
                    first: stamp.to_string(),
                    last: stamp.to_string(),
                })
            }
        }
    }

    fn merge(bounds: &mut Option<TimeBounds>, other: &TimeBounds) {
        Self::observe(bounds, &other.first);
        Self::observe(bounds, &other.last);
    }
}

/// Per-worker tally kept by a parse worker and merged once when it exits.
#[derive(Debug, Default)]
pub struct ParseTally {
    pub skipped: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub errored: u64,
    pub parse_time: Duration,
}

/// Per-worker tally kept by a batcher and merged once when it exits.
#[derive(Debug, Default)]
pub struct BatchTally {
    pub status_counts: HashMap<String, u64>,
    pub bounds: Option<TimeBounds>,
}

impl BatchTally {
    pub fn observe(&mut self, status: &str, stamp: &str) {
        *self.status_counts.entry(status.to_string()).or_insert(0) += 1;
        TimeBounds::observe(&mut self.bounds, stamp);
    }
}

/// Shared counters for one pipeline run.
///
/// Counters use `Ordering::Relaxed`; values are only read together once the
/// workers have been joined, at which point every write is visible.
#[derive(Debug)]
pub struct PipelineMetrics {
    pub lines: CacheAligned<LineMetrics>,
    pub writes: CacheAligned<WriteMetrics>,
    pub timings: CacheAligned<TimingMetrics>,
    last_error: Mutex<Option<String>>,
    status_counts: DashMap<String, u64>,
    bounds: Mutex<Option<TimeBounds>>,
    started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            lines: CacheAligned::default(),
            writes: CacheAligned::default(),
            timings: CacheAligned::default(),
            last_error: Mutex::new(None),
            status_counts: DashMap::new(),
            bounds: Mutex::new(None),
            started_at: Instant::now(),
        }
    }

    // --- Reader ---

    #[inline]
    pub fn record_line_read(&self) {
        self.lines.0.read.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_non_utf8(&self) {
        self.lines.0.non_utf8.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_skipped(&self) {
        self.lines.0.skipped.fetch_add(1, Ordering::Relaxed);
    }

    // --- Parse stage ---

    pub fn merge_parse(&self, tally: &ParseTally) {
        let l = &self.lines.0;
        l.skipped.fetch_add(tally.skipped, Ordering::Relaxed);
        l.rejected.fetch_add(tally.rejected, Ordering::Relaxed);
        l.delivered.fetch_add(tally.delivered, Ordering::Relaxed);
        l.errored.fetch_add(tally.errored, Ordering::Relaxed);
        self.timings
            .0
            .parse_nanos
            .fetch_add(tally.parse_time.as_nanos() as u64, Ordering::Relaxed);
    }

    // --- Combine stage ---

    /// Called once per record received by a batcher.
    #[inline]
    pub fn record_seen(&self) {
        self.writes.0.total_records.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_batch(&self) {
        self.writes.0.batches.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_success(&self, count: u64) {
        self.writes.0.successful.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failure(&self, count: u64) {
        self.writes.0.failed.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_discarded(&self, count: u64) {
        self.writes.0.discarded.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_insert_time(&self, elapsed: Duration) {
        self.timings
            .0
            .insert_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn merge_batch(&self, tally: BatchTally) {
        for (status, count) in tally.status_counts {
            *self.status_counts.entry(status).or_insert(0) += count;
        }
        if let Some(other) = tally.bounds {
            TimeBounds::merge(&mut self.bounds.lock(), &other);
        }
    }

    pub fn set_last_error(&self, err: impl ToString) {
        *self.last_error.lock() = Some(err.to_string());
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    // --- Snapshot Export ---

    pub fn snapshot(&self) -> MetricsSnapshot {
        let l = &self.lines.0;
        let w = &self.writes.0;
        let t = &self.timings.0;

        let elapsed = self.elapsed();
        let total_records = w.total_records.load(Ordering::Relaxed);
        let secs = elapsed.as_secs_f64();

        MetricsSnapshot {
            lines_read: l.read.load(Ordering::Relaxed),
            lines_skipped: l.skipped.load(Ordering::Relaxed),
            lines_rejected: l.rejected.load(Ordering::Relaxed),
            lines_delivered: l.delivered.load(Ordering::Relaxed),
            lines_errored: l.errored.load(Ordering::Relaxed),
            lines_non_utf8: l.non_utf8.load(Ordering::Relaxed),
            total_records,
            successful_writes: w.successful.load(Ordering::Relaxed),
            failed_writes: w.failed.load(Ordering::Relaxed),
            discarded_records: w.discarded.load(Ordering::Relaxed),
            batch_count: w.batches.load(Ordering::Relaxed),
            parse_time_ms: t.parse_nanos.load(Ordering::Relaxed) / 1_000_000,
            insertion_time_ms: t.insert_nanos.load(Ordering::Relaxed) / 1_000_000,
            elapsed_ms: elapsed.as_millis() as u64,
            records_per_second: if secs > 0.0 {
                total_records as f64 / secs
            } else {
                0.0
            },
            lines_per_second: if secs > 0.0 {
                l.read.load(Ordering::Relaxed) as f64 / secs
            } else {
                0.0
            },
            status_counts: self
                .status_counts
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            time_bounds: self.bounds.lock().clone(),
            last_error: self.last_error(),
        }
    }
}

/// Read-only view of a run's metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub lines_read: u64,
    pub lines_skipped: u64,
    pub lines_rejected: u64,
    pub lines_delivered: u64,
    pub lines_errored: u64,
    pub lines_non_utf8: u64,

    pub total_records: u64,
    pub successful_writes: u64,
    pub failed_writes: u64,
    pub discarded_records: u64,
    pub batch_count: u64,

    pub parse_time_ms: u64,
    pub insertion_time_ms: u64,
    pub elapsed_ms: u64,
    pub records_per_second: f64,
    pub lines_per_second: f64,

    pub status_counts: BTreeMap<String, u64>,
    pub time_bounds: Option<TimeBounds>,
    pub last_error: Option<String>,
}

impl MetricsSnapshot {
    /// Every line read ended up skipped, rejected, delivered or errored.
    pub fn is_accounted(&self) -> bool {
        self.lines_skipped + self.lines_rejected + self.lines_delivered + self.lines_errored
            == self.lines_read
    }

    pub fn log_summary(&self, operation: &str) {
        info!(
            operation,
            total_records = self.total_records,
            successful_writes = self.successful_writes,
            failed_writes = self.failed_writes,
            discarded_records = self.discarded_records,
            batch_count = self.batch_count,
            records_per_second = %format!("{:.2}", self.records_per_second),
            parse_time_ms = self.parse_time_ms,
            insertion_time_ms = self.insertion_time_ms,
            duration_ms = self.elapsed_ms,
            last_error = self.last_error.as_deref().unwrap_or(""),
            "operation metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_are_empty() {
        let snap = PipelineMetrics::new().snapshot();
        assert_eq!(snap.lines_read, 0);
        assert_eq!(snap.total_records, 0);
        assert_eq!(snap.batch_count, 0);
        assert!(snap.status_counts.is_empty());
        assert!(snap.time_bounds.is_none());
        assert!(snap.last_error.is_none());
        assert!(snap.is_accounted());
    }

    #[test]
    fn test_cache_aligned_groups() {
        assert_eq!(std::mem::align_of::<CacheAligned<LineMetrics>>(), 64);
        assert_eq!(std::mem::align_of::<CacheAligned<WriteMetrics>>(), 64);
    }

    #[test]
    fn test_merge_parse_tally() {
        let metrics = PipelineMetrics::new();
        for _ in 0..5 {
            metrics.record_line_read();
        }
        metrics.record_skipped();
        metrics.merge_parse(&ParseTally {
            skipped: 1,
            rejected: 1,
            delivered: 2,
            errored: 0,
            parse_time: Duration::from_millis(3),
        });

        let snap = metrics.snapshot();
        assert_eq!(snap.lines_skipped, 2);
        assert_eq!(snap.lines_rejected, 1);
        assert_eq!(snap.lines_delivered, 2);
        assert_eq!(snap.parse_time_ms, 3);
        assert!(snap.is_accounted());
    }

    #[test]
    fn test_unaccounted_lines_detected() {
        let metrics = PipelineMetrics::new();
        metrics.record_line_read();
        assert!(!metrics.snapshot().is_accounted());
    }

    #[test]
    fn test_write_counters() {
        let metrics = PipelineMetrics::new();
        for _ in 0..4 {
            metrics.record_seen();
        }
        metrics.record_batch();
        metrics.record_success(3);
        metrics.record_failure(1);

        let snap = metrics.snapshot();
        assert_eq!(snap.total_records, 4);
        assert_eq!(snap.successful_writes, 3);
        assert_eq!(snap.failed_writes, 1);
        assert_eq!(snap.batch_count, 1);
    }

    #[test]
    fn test_merge_batch_tallies() {
        let metrics = PipelineMetrics::new();

        let mut a = BatchTally::default();
        a.observe("200", "2023-10-10 12:00:05");
        a.observe("404", "2023-10-10 12:00:01");
        let mut b = BatchTally::default();
        b.observe("200", "2023-10-10 12:00:09");

        metrics.merge_batch(a);
        metrics.merge_batch(b);

        let snap = metrics.snapshot();
        assert_eq!(snap.status_counts.get("200"), Some(&2));
        assert_eq!(snap.status_counts.get("404"), Some(&1));
        let bounds = snap.time_bounds.unwrap();
        assert_eq!(bounds.first, "2023-10-10 12:00:01");
        assert_eq!(bounds.last, "2023-10-10 12:00:09");
    }

    #[test]
    fn test_last_error_overwritten() {
        let metrics = PipelineMetrics::new();
        metrics.set_last_error("first");
        metrics.set_last_error("second");
        assert_eq!(metrics.last_error().as_deref(), Some("second"));
    }
}
