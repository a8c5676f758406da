use std::fmt;
use std::io;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::PipelineReport;

const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    fn can_become(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

/// Metadata kept for one ingested file.
///
/// `start_timestamp` and `end_timestamp` are the earliest and latest
/// request times found in the file, not wall-clock processing times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: u64,
    pub name: String,
    pub size: u64,
    pub status: JobStatus,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub parsing_duration_nanos: Option<u64>,
    pub error: Option<String>,
}

impl JobRecord {
    pub fn new(id: u64, name: impl Into<String>, size: u64) -> Self {
        Self {
            id,
            name: name.into(),
            size,
            status: JobStatus::Pending,
            start_timestamp: None,
            end_timestamp: None,
            parsing_duration_nanos: None,
            error: None,
        }
    }

    /// Pending job named after the file, sized from its metadata.
    pub fn for_file(id: u64, path: &Path) -> io::Result<Self> {
        let size = std::fs::metadata(path)?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(id, name, size))
    }

    pub fn start(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Processing)
    }

    pub fn complete(&mut self, report: &PipelineReport, elapsed: Duration) -> Result<(), JobError> {
        self.transition(JobStatus::Completed)?;
        if let Some(bounds) = &report.metrics.time_bounds {
            self.start_timestamp = parse_log_timestamp(&bounds.first);
            self.end_timestamp = parse_log_timestamp(&bounds.last);
        }
        self.parsing_duration_nanos = Some(duration_nanos(elapsed));
        Ok(())
    }

    pub fn fail(&mut self, err: &dyn fmt::Display, elapsed: Duration) -> Result<(), JobError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(err.to_string());
        self.parsing_duration_nanos = Some(duration_nanos(elapsed));
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_become(next) {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Saturates at `u64::MAX` (about 584 years).
fn duration_nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

/// Interpret a W3C `date time` pair as UTC. IIS writes log times in UTC.
pub fn parse_log_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, LOG_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ErrorSinkTally, PipelineMetrics, PipelineState};
    use chrono::{Datelike, Timelike};
    use std::path::PathBuf;

    fn report_with_bounds(first: &str, last: &str) -> PipelineReport {
        let metrics = PipelineMetrics::new();
        let mut tally = crate::pipeline::metrics::BatchTally::default();
        tally.observe("200", first);
        tally.observe("200", last);
        metrics.merge_batch(tally);
        PipelineReport {
            source: PathBuf::from("a.log"),
            audit_path: PathBuf::from("a.log_parsed_logs.txt"),
            parse_workers: 1,
            batch_workers: 1,
            state: PipelineState::Done,
            errors: ErrorSinkTally::default(),
            metrics: metrics.snapshot(),
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    #[test]
    fn test_new_job_is_pending() {
        let job = JobRecord::new(1, "u_ex231010.log", 42);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.start_timestamp.is_none());
    }

    #[test]
    fn test_complete_sets_timestamps_from_records() {
        let mut job = JobRecord::new(1, "a.log", 10);
        job.start().unwrap();
        let report = report_with_bounds("2023-10-10 12:00:00", "2023-10-10 12:00:02");
        job.complete(&report, Duration::from_millis(1500)).unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        let start = job.start_timestamp.unwrap();
        let end = job.end_timestamp.unwrap();
        assert_eq!((start.year(), start.month(), start.day()), (2023, 10, 10));
        assert_eq!((end.hour(), end.minute(), end.second()), (12, 0, 2));
        assert_eq!(job.parsing_duration_nanos, Some(1_500_000_000));
    }

    #[test]
    fn test_fail_records_error() {
        let mut job = JobRecord::new(1, "a.log", 10);
        job.start().unwrap();
        job.fail(&"bad header", Duration::from_millis(3)).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("bad header"));
        assert_eq!(job.parsing_duration_nanos, Some(3_000_000));
    }

    #[test]
    fn test_duration_nanos_saturates() {
        assert_eq!(duration_nanos(Duration::from_nanos(42)), 42);
        assert_eq!(duration_nanos(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_cannot_complete_pending_job() {
        let mut job = JobRecord::new(1, "a.log", 10);
        let report = report_with_bounds("2023-10-10 12:00:00", "2023-10-10 12:00:00");
        let err = job.complete(&report, Duration::ZERO).unwrap_err();
        assert_eq!(
            err,
            JobError::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed
            }
        );
        assert_eq!(err.to_string(), "invalid job transition: pending -> completed");
    }

    #[test]
    fn test_cannot_restart_finished_job() {
        let mut job = JobRecord::new(1, "a.log", 10);
        job.start().unwrap();
        job.fail(&"x", Duration::ZERO).unwrap();
        assert!(job.start().is_err());
    }

    // ── Timestamps ───────────────────────────────────────────────

    #[test]
    fn test_parse_log_timestamp() {
        assert!(parse_log_timestamp("2023-10-10 12:00:00").is_some());
        assert!(parse_log_timestamp("2023-10-10T12:00:00").is_none());
        assert!(parse_log_timestamp("- -").is_none());
    }

    #[test]
    fn test_for_file_reads_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("u_ex231010.log");
        std::fs::write(&path, "0123456789").unwrap();

        let job = JobRecord::for_file(7, &path).unwrap();
        assert_eq!(job.id, 7);
        assert_eq!(job.name, "u_ex231010.log");
        assert_eq!(job.size, 10);
    }

    #[test]
    fn test_job_serializes_status_lowercase() {
        let job = JobRecord::new(1, "a.log", 1);
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"status\":\"pending\""));
    }
}
