//! Error sink: the single consumer of per-line problems.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use serde::Serialize;
use tracing::{error, warn};

use super::PipelineMetrics;
use crate::parser::ParseRejection;

/// Bytes of a rejected line included in its log event.
const LOGGED_LINE_LEN: usize = 256;

/// A per-line problem reported by the parse stage. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    Rejected(ParseRejection),
    /// The parser failed in a way it does not report through its result.
    Unexpected { line_number: u64, message: String },
}

/// Counts of what the sink drained, returned when the queue closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorSinkTally {
    pub rejected: u64,
    pub unexpected: u64,
}

/// Drain `errors` until every parse worker has dropped its sender.
///
/// Not wired to the stop signal; the queue closes once the parse workers
/// exit.
pub(crate) fn run_error_sink(errors: Receiver<StageError>, metrics: Arc<PipelineMetrics>) -> ErrorSinkTally {
    let mut tally = ErrorSinkTally::default();
    for item in errors.iter() {
        match item {
            StageError::Rejected(rej) => {
                tally.rejected += 1;
                warn!(
                    line_number = rej.line_number,
                    line = %truncate(&rej.source_line, LOGGED_LINE_LEN),
                    reason = %rej.reason,
                    "failed to parse log line"
                );
            }
            StageError::Unexpected { line_number, message } => {
                tally.unexpected += 1;
                error!(line_number, error = %message, "unexpected error while parsing");
                metrics.set_last_error(format!("line {}: {}", line_number, message));
            }
        }
    }
    tally
}

/// Longest prefix of `s` no longer than `max` bytes, cut on a char boundary.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 256), "short");
        assert_eq!(truncate("abcdef", 3), "abc");
        // 'é' is two bytes; cutting at 2 would split it.
        assert_eq!(truncate("aéb", 2), "a");
    }

    #[test]
    fn test_error_sink_drains_until_closed() {
        let metrics = Arc::new(PipelineMetrics::new());
        let (tx, rx) = unbounded();
        tx.send(StageError::Rejected(ParseRejection::field_count(2, "a b", 2))).unwrap();
        tx.send(StageError::Rejected(ParseRejection::field_count(3, "a", 1))).unwrap();
        tx.send(StageError::Unexpected {
            line_number: 4,
            message: "boom".to_string(),
        })
        .unwrap();
        drop(tx);

        let tally = run_error_sink(rx, Arc::clone(&metrics));
        assert_eq!(tally.rejected, 2);
        assert_eq!(tally.unexpected, 1);
        assert_eq!(metrics.last_error().as_deref(), Some("line 4: boom"));
    }

    #[test]
    fn test_rejections_do_not_set_last_error() {
        let metrics = Arc::new(PipelineMetrics::new());
        let (tx, rx) = unbounded();
        tx.send(StageError::Rejected(ParseRejection::field_count(1, "x", 1))).unwrap();
        drop(tx);

        run_error_sink(rx, Arc::clone(&metrics));
        assert!(metrics.last_error().is_none());
    }
}
