use super::model::{LineOutcome, LogRecord, ParseRejection, SchemaMismatch};
use super::{FIELDS_DIRECTIVE, FIELD_COUNT};

const FIELDS_PREFIX: &str = "#Fields:";

/// Classify one line of a W3C extended log.
///
/// `line` must already have its terminator stripped. Tokens are separated
/// by a single space, so two consecutive spaces produce an empty token.
/// Tokens past the 14th are ignored.
///
/// Stateless: the same input always yields the same outcome.
pub fn parse_line(line: &str, line_number: u64) -> Result<LineOutcome, SchemaMismatch> {
    if line.starts_with(FIELDS_PREFIX) {
        if line != FIELDS_DIRECTIVE {
            return Err(SchemaMismatch {
                line_number,
                found: line.to_string(),
            });
        }
        return Ok(LineOutcome::Skip);
    }

    if line.starts_with('#') || line.trim().is_empty() {
        return Ok(LineOutcome::Skip);
    }

    let tokens: Vec<&str> = line.split(' ').take(FIELD_COUNT).collect();
    match LogRecord::from_tokens(&tokens, line_number) {
        Some(record) => Ok(LineOutcome::Record(record)),
        None => Ok(LineOutcome::Rejected(ParseRejection::field_count(
            line_number,
            line,
            line.split(' ').count(),
        ))),
    }
}
