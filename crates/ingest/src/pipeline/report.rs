use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use super::errors::ErrorSinkTally;
use super::metrics::MetricsSnapshot;
use super::state::PipelineState;

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub source: PathBuf,
    pub audit_path: PathBuf,
    pub parse_workers: usize,
    pub batch_workers: usize,
    pub state: PipelineState,
    pub errors: ErrorSinkTally,
    pub metrics: MetricsSnapshot,
}

const STATUS_HEADERS: [&str; 2] = ["Status Code", "Number of Occurrences"];

/// Render per-status counts as a two-column text table, one row per
/// status in ascending order.
///
/// ```text
/// | Status Code | Number of Occurrences |
/// | ----------- | --------------------- |
/// | 200         | 1                     |
/// ```
pub fn status_table(counts: &BTreeMap<String, u64>) -> String {
    let rows: Vec<[String; 2]> = counts
        .iter()
        .map(|(status, count)| [status.clone(), count.to_string()])
        .collect();

    let mut widths = STATUS_HEADERS.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.len());
        }
    }

    let render = |cells: [&str; 2]| {
        format!("| {:<w0$} | {:<w1$} |", cells[0], cells[1], w0 = widths[0], w1 = widths[1])
    };

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(render(STATUS_HEADERS));
    let sep = ["-".repeat(widths[0]), "-".repeat(widths[1])];
    lines.push(render([sep[0].as_str(), sep[1].as_str()]));
    for row in &rows {
        lines.push(render([row[0].as_str(), row[1].as_str()]));
    }
    lines.join("\n")
}
