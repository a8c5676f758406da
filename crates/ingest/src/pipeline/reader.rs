//! Sequential source reader feeding the line queue.

use std::io::{self, BufRead, Read};

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use super::queue::{self, Halt};
use super::state::AbortFlag;
use super::{PipelineError, PipelineMetrics};
use crate::parser::{self, MAX_LINE_SIZE};

/// One accepted line plus a `\r\n` terminator.
const READ_LIMIT: u64 = MAX_LINE_SIZE as u64 + 2;

/// Bytes of an oversized line kept for error reporting.
const PREVIEW_LEN: usize = 128;

/// A raw line with its terminator removed and its 1-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub number: u64,
    pub text: String,
    /// Length in bytes, up to the newline, of a line longer than
    /// [`MAX_LINE_SIZE`]. `text` then holds only its first bytes.
    pub oversized: Option<u64>,
}

impl SourceLine {
    pub fn new(number: u64, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
            oversized: None,
        }
    }

    fn oversized(number: u64, content: &[u8], length: u64) -> Self {
        let end = content.len().min(PREVIEW_LEN);
        Self {
            number,
            text: String::from_utf8_lossy(&content[..end]).into_owned(),
            oversized: Some(length),
        }
    }
}

/// How the reader stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadEnd {
    Eof,
    Stopped,
    Aborted,
}

/// Read `input` to the end, handing each data line to the parse stage.
///
/// Directive lines (`#...`) are classified right here so that an
/// unsupported `#Fields:` layout stops reading before any later line is
/// queued. At most [`MAX_LINE_SIZE`] bytes of a line are held in memory;
/// the rest of a longer line is skipped and the line is handed on marked
/// as oversized. The line queue closes when `lines` is dropped on return.
pub(crate) fn read_lines<R: BufRead>(
    mut input: R,
    lines: Sender<SourceLine>,
    stop: &Receiver<()>,
    abort: &AbortFlag,
    metrics: &PipelineMetrics,
) -> ReadEnd {
    let mut buf = Vec::with_capacity(512);
    let mut number: u64 = 0;

    loop {
        if abort.is_raised() {
            return ReadEnd::Aborted;
        }

        buf.clear();
        match input.by_ref().take(READ_LIMIT).read_until(b'\n', &mut buf) {
            Ok(0) => {
                debug!(lines = number, "reached end of source");
                return ReadEnd::Eof;
            }
            Ok(_) => {}
            Err(source) => {
                abort.raise(PipelineError::Read {
                    line_number: number + 1,
                    source,
                });
                return ReadEnd::Aborted;
            }
        }

        number += 1;
        metrics.record_line_read();

        let truncated = buf.last() != Some(&b'\n') && buf.len() as u64 == READ_LIMIT;
        let content = strip_terminator(&buf);

        let line = if truncated || content.len() > MAX_LINE_SIZE {
            let mut length = content.len() as u64;
            if truncated {
                match skip_rest_of_line(&mut input) {
                    Ok(rest) => length += rest,
                    Err(source) => {
                        abort.raise(PipelineError::Read {
                            line_number: number,
                            source,
                        });
                        return ReadEnd::Aborted;
                    }
                }
            }
            debug!(line_number = number, bytes = length, "line exceeds size limit");
            SourceLine::oversized(number, content, length)
        } else {
            let text = decode(content, metrics);
            if text.starts_with('#') {
                match parser::parse_line(&text, number) {
                    Ok(_) => {
                        metrics.record_skipped();
                        continue;
                    }
                    Err(mismatch) => {
                        abort.raise(mismatch.into());
                        return ReadEnd::Aborted;
                    }
                }
            }
            SourceLine::new(number, text)
        };

        match queue::send(&lines, line, stop) {
            Ok(()) => {}
            Err(Halt::Stopped) => return ReadEnd::Stopped,
            Err(Halt::Closed) => {
                abort.raise(PipelineError::Worker("parse stage exited before end of input".to_string()));
                return ReadEnd::Aborted;
            }
        }
    }
}

/// Consume input through the next `\n`. Returns the number of bytes
/// skipped before it.
fn skip_rest_of_line<R: BufRead>(input: &mut R) -> io::Result<u64> {
    let mut skipped: u64 = 0;
    loop {
        let (used, done) = {
            let available = match input.fill_buf() {
                Ok(available) => available,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if available.is_empty() {
                return Ok(skipped);
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    skipped += pos as u64;
                    (pos + 1, true)
                }
                None => {
                    skipped += available.len() as u64;
                    (available.len(), false)
                }
            }
        };
        input.consume(used);
        if done {
            return Ok(skipped);
        }
    }
}

/// Strip `\n` / `\r\n`.
fn strip_terminator(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && raw[end - 1] == b'\r' {
            end -= 1;
        }
    }
    &raw[..end]
}

/// Decode, replacing invalid UTF-8 sequences.
fn decode(bytes: &[u8], metrics: &PipelineMetrics) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            metrics.record_non_utf8();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
