use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{FIELD_COUNT, MAX_LINE_SIZE};

/// One parsed access-log entry.
///
/// All 14 columns are kept as the raw tokens from the source line. Values
/// are never interpreted here: `-` stays `-` and numbers stay text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogRecord {
    /// 1-based position of the source line in the file. Not a store column.
    #[serde(skip)]
    pub line_number: u64,
    pub date: String,
    pub time: String,
    pub server_ip: String,
    pub method: String,
    pub uri_stem: String,
    pub uri_query: String,
    pub port: String,
    pub username: String,
    pub client_ip: String,
    pub user_agent: String,
    pub status: String,
    pub sub_status: String,
    pub win32_status: String,
    pub time_taken: String,
}

impl LogRecord {
    /// Build a record from the first 14 tokens of a split line.
    ///
    /// Returns `None` when fewer than 14 tokens are available.
    pub fn from_tokens(tokens: &[&str], line_number: u64) -> Option<Self> {
        if tokens.len() < FIELD_COUNT {
            return None;
        }
        Some(Self {
            line_number,
            date: tokens[0].to_string(),
            time: tokens[1].to_string(),
            server_ip: tokens[2].to_string(),
            method: tokens[3].to_string(),
            uri_stem: tokens[4].to_string(),
            uri_query: tokens[5].to_string(),
            port: tokens[6].to_string(),
            username: tokens[7].to_string(),
            client_ip: tokens[8].to_string(),
            user_agent: tokens[9].to_string(),
            status: tokens[10].to_string(),
            sub_status: tokens[11].to_string(),
            win32_status: tokens[12].to_string(),
            time_taken: tokens[13].to_string(),
        })
    }

    /// Column values in store order (matches [`super::COLUMNS`]).
    pub fn fields(&self) -> [&str; FIELD_COUNT] {
        [
            self.date.as_str(),
            self.time.as_str(),
            self.server_ip.as_str(),
            self.method.as_str(),
            self.uri_stem.as_str(),
            self.uri_query.as_str(),
            self.port.as_str(),
            self.username.as_str(),
            self.client_ip.as_str(),
            self.user_agent.as_str(),
            self.status.as_str(),
            self.sub_status.as_str(),
            self.win32_status.as_str(),
            self.time_taken.as_str(),
        ]
    }

    /// `date time` as written in the log, used for time-span tracking.
    pub fn timestamp(&self) -> String {
        format!("{} {}", self.date, self.time)
    }

    /// Render the audit line, optionally tagged with the source line number.
    pub fn audit_line(&self, with_line_number: bool) -> String {
        if with_line_number {
            format!("{{Line:{} {}}}", self.line_number, AuditFields(self))
        } else {
            format!("{{{}}}", AuditFields(self))
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", AuditFields(self))
    }
}

struct AuditFields<'a>(&'a LogRecord);

impl fmt::Display for AuditFields<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.0;
        write!(
            f,
            "Date:{} Time:{} ServerIP:{} Method:{} URIStem:{} URIQuery:{} Port:{} Username:{} \
             ClientIP:{} UserAgent:{} Status:{} SubStatus:{} Win32Status:{} TimeTaken:{}",
            r.date,
            r.time,
            r.server_ip,
            r.method,
            r.uri_stem,
            r.uri_query,
            r.port,
            r.username,
            r.client_ip,
            r.user_agent,
            r.status,
            r.sub_status,
            r.win32_status,
            r.time_taken,
        )
    }
}

/// A data line that could not be turned into a record. Recoverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRejection {
    pub line_number: u64,
    pub source_line: String,
    pub reason: String,
}

impl ParseRejection {
    pub fn field_count(line_number: u64, source_line: &str, found: usize) -> Self {
        Self {
            line_number,
            source_line: source_line.to_string(),
            reason: format!("expected {} fields, got {}", FIELD_COUNT, found),
        }
    }

    /// `preview` is the start of the line; `length` is its full size in bytes.
    pub fn too_large(line_number: u64, preview: &str, length: u64) -> Self {
        Self {
            line_number,
            source_line: preview.to_string(),
            reason: format!("line of {} bytes exceeds the {} byte limit", length, MAX_LINE_SIZE),
        }
    }
}

impl fmt::Display for ParseRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line_number, self.reason)
    }
}

/// Result of classifying a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Record(LogRecord),
    /// Directive or blank line; carries no data.
    Skip,
    Rejected(ParseRejection),
}

/// The file announces a column layout this parser cannot map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported field layout at line {line_number}: {found}")]
pub struct SchemaMismatch {
    pub line_number: u64,
    pub found: String,
}
