//! Line parser for W3C extended (IIS) access logs.
//!
//! A log file is a sequence of `#` directives followed by space-delimited
//! data lines in the column order announced by the `#Fields:` directive.
//! This module understands exactly one column layout:
//!
//! ```text
//! #Fields: date time s-ip cs-method cs-uri-stem cs-uri-query s-port cs-username c-ip cs(User-Agent) sc-status sc-substatus sc-win32-status time-taken
//! ```
//!
//! Any line is classified into one of three outcomes (record, skip,
//! rejection). The only fatal condition is a `#Fields:` directive that
//! announces a different layout, since every following data line would be
//! mapped onto the wrong columns.

pub mod model;
pub mod w3c;

pub use model::{LineOutcome, LogRecord, ParseRejection, SchemaMismatch};
pub use w3c::parse_line;

/// The only `#Fields:` directive accepted by the parser.
pub const FIELDS_DIRECTIVE: &str = "#Fields: date time s-ip cs-method cs-uri-stem cs-uri-query s-port cs-username c-ip cs(User-Agent) sc-status sc-substatus sc-win32-status time-taken";

/// Longest accepted line, terminator excluded. Longer lines are rejected
/// without being buffered whole.
pub const MAX_LINE_SIZE: usize = 1_048_576; // 1MB

/// Number of positional fields in a data line.
pub const FIELD_COUNT: usize = 14;

/// Store column names, in positional order.
pub const COLUMNS: [&str; FIELD_COUNT] = [
    "date",
    "time",
    "server_ip",
    "method",
    "uri_stem",
    "uri_query",
    "port",
    "username",
    "client_ip",
    "user_agent",
    "status",
    "sub_status",
    "win32_status",
    "time_taken",
];
