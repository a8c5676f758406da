//! Parse stage: fan-out over the line queue.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use super::errors::StageError;
use super::metrics::ParseTally;
use super::queue::{self, Halt};
use super::reader::SourceLine;
use super::state::AbortFlag;
use super::PipelineMetrics;
use crate::parser::{self, LineOutcome, LogRecord, ParseRejection};

pub(crate) struct ParseWorker {
    pub id: usize,
    pub lines: Receiver<SourceLine>,
    pub records: Sender<LogRecord>,
    pub errors: Sender<StageError>,
    pub stop: Receiver<()>,
    pub abort: Arc<AbortFlag>,
    pub metrics: Arc<PipelineMetrics>,
}

impl ParseWorker {
    /// Run until the line queue closes or the stop signal trips, then merge
    /// the local tally into the run metrics. Dropping `self` on return
    /// releases this worker's record and error senders.
    ///
    /// Returns true if the stop signal cut the run short.
    pub(crate) fn run(self) -> bool {
        let mut tally = ParseTally::default();
        let mut stopped = false;

        loop {
            let line = match queue::recv(&self.lines, &self.stop) {
                Ok(line) => line,
                Err(halt) => {
                    stopped = halt == Halt::Stopped;
                    break;
                }
            };

            let outcome = match line.oversized {
                Some(length) => Ok(Ok(LineOutcome::Rejected(ParseRejection::too_large(
                    line.number,
                    &line.text,
                    length,
                )))),
                None => {
                    let started = Instant::now();
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        parser::parse_line(&line.text, line.number)
                    }));
                    tally.parse_time += started.elapsed();
                    outcome
                }
            };

            let delivered = match outcome {
                Ok(Ok(LineOutcome::Record(record))) => {
                    let sent = queue::send(&self.records, record, &self.stop);
                    if sent.is_ok() {
                        tally.delivered += 1;
                    }
                    sent
                }
                Ok(Ok(LineOutcome::Skip)) => {
                    tally.skipped += 1;
                    Ok(())
                }
                Ok(Ok(LineOutcome::Rejected(rejection))) => {
                    tally.rejected += 1;
                    queue::send(&self.errors, StageError::Rejected(rejection), &self.stop)
                }
                Ok(Err(mismatch)) => {
                    self.abort.raise(mismatch.into());
                    Ok(())
                }
                Err(payload) => {
                    tally.errored += 1;
                    let err = StageError::Unexpected {
                        line_number: line.number,
                        message: panic_message(payload.as_ref()),
                    };
                    queue::send(&self.errors, err, &self.stop)
                }
            };

            if let Err(halt) = delivered {
                if halt == Halt::Closed {
                    debug!(worker = self.id, "downstream queue closed");
                }
                stopped = halt == Halt::Stopped;
                break;
            }
        }

        debug!(
            worker = self.id,
            delivered = tally.delivered,
            rejected = tally.rejected,
            skipped = tally.skipped,
            stopped,
            "parse worker finished"
        );
        self.metrics.merge_parse(&tally);
        stopped
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("parser panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("parser panicked: {}", s)
    } else {
        "parser panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::queue::{rendezvous, StopSignal};
    use std::thread;

    fn line(number: u64, text: &str) -> SourceLine {
        SourceLine::new(number, text)
    }

    #[test]
    fn test_panic_message_variants() {
        let payload: Box<dyn Any + Send> = Box::new("bad");
        assert_eq!(panic_message(payload.as_ref()), "parser panicked: bad");
        let payload: Box<dyn Any + Send> = Box::new(String::from("worse"));
        assert_eq!(panic_message(payload.as_ref()), "parser panicked: worse");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "parser panicked");
    }

    #[test]
    fn test_worker_routes_outcomes() {
        let stop = StopSignal::new();
        let metrics = Arc::new(PipelineMetrics::new());
        let abort = Arc::new(AbortFlag::default());
        let (line_tx, line_rx) = rendezvous();
        let (record_tx, record_rx) = rendezvous();
        let (error_tx, error_rx) = rendezvous();

        let worker = ParseWorker {
            id: 0,
            lines: line_rx,
            records: record_tx,
            errors: error_tx,
            stop: stop.listener(),
            abort: Arc::clone(&abort),
            metrics: Arc::clone(&metrics),
        };
        let handle = thread::spawn(move || worker.run());

        let records = thread::spawn(move || record_rx.iter().collect::<Vec<_>>());
        let errors = thread::spawn(move || error_rx.iter().collect::<Vec<_>>());

        line_tx
            .send(line(1, "2023-10-10 12:00:00 1.1.1.1 GET / - 80 - 2.2.2.2 ua 200 0 0 1"))
            .unwrap();
        line_tx.send(line(2, "")).unwrap();
        line_tx.send(line(3, "too short")).unwrap();
        line_tx
            .send(SourceLine {
                oversized: Some(5_000_000),
                ..line(4, "2023-10-10 12:00:00 1.1.1.1 GET")
            })
            .unwrap();
        drop(line_tx);

        let stopped = handle.join().unwrap();
        let records = records.join().unwrap();
        let errors = errors.join().unwrap();

        assert!(!stopped);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].line_number, 1);
        assert_eq!(errors.len(), 2);
        assert!(matches!(&errors[0], StageError::Rejected(r) if r.line_number == 3));
        assert!(matches!(
            &errors[1],
            StageError::Rejected(r) if r.line_number == 4 && r.reason.starts_with("line of 5000000 bytes")
        ));
        assert!(!abort.is_raised());

        let snap = metrics.snapshot();
        assert_eq!(snap.lines_delivered, 1);
        assert_eq!(snap.lines_skipped, 1);
        assert_eq!(snap.lines_rejected, 2);
    }

    #[test]
    fn test_worker_reports_stop() {
        let stop = StopSignal::new();
        let (_line_tx, line_rx) = rendezvous::<SourceLine>();
        let (record_tx, _record_rx) = rendezvous::<LogRecord>();
        let (error_tx, _error_rx) = rendezvous::<StageError>();

        let worker = ParseWorker {
            id: 0,
            lines: line_rx,
            records: record_tx,
            errors: error_tx,
            stop: stop.listener(),
            abort: Arc::new(AbortFlag::default()),
            metrics: Arc::new(PipelineMetrics::new()),
        };
        let handle = thread::spawn(move || worker.run());
        stop.trip();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_worker_raises_abort_on_schema_mismatch() {
        let stop = StopSignal::new();
        let abort = Arc::new(AbortFlag::default());
        let (line_tx, line_rx) = rendezvous();
        let (record_tx, _record_rx) = rendezvous::<LogRecord>();
        let (error_tx, _error_rx) = rendezvous::<StageError>();

        let worker = ParseWorker {
            id: 0,
            lines: line_rx,
            records: record_tx,
            errors: error_tx,
            stop: stop.listener(),
            abort: Arc::clone(&abort),
            metrics: Arc::new(PipelineMetrics::new()),
        };
        let handle = thread::spawn(move || worker.run());

        line_tx.send(line(1, "#Fields: date time")).unwrap();
        drop(line_tx);
        handle.join().unwrap();

        assert!(abort.is_raised());
        assert!(matches!(abort.take(), Some(crate::pipeline::PipelineError::SchemaMismatch(_))));
    }
}
