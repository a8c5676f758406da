//! Append-only audit file with one line per record handed to a batcher.
//!
//! Batchers write concurrently; each line is appended under a single lock
//! so lines never interleave. The order of lines across batchers is not
//! defined.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::parser::LogRecord;

/// Suffix appended to the source path to derive the default audit path.
pub const AUDIT_SUFFIX: &str = "_parsed_logs.txt";

/// `access.log` becomes `access.log_parsed_logs.txt`.
pub fn default_audit_path(source: &Path, suffix: &str) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

pub struct AuditWriter {
    path: PathBuf,
    out: Mutex<BufWriter<File>>,
    with_line_numbers: bool,
}

impl AuditWriter {
    /// Create or truncate the audit file.
    pub fn create(path: impl AsRef<Path>, with_line_numbers: bool) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            out: Mutex::new(BufWriter::new(file)),
            with_line_numbers,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &LogRecord) -> io::Result<()> {
        let mut line = record.audit_line(self.with_line_numbers);
        line.push('\n');
        self.out.lock().write_all(line.as_bytes())
    }

    pub fn flush(&self) -> io::Result<()> {
        self.out.lock().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn record(n: u64) -> LogRecord {
        let line = format!("2023-10-10 12:00:00 10.0.0.1 GET /r{} - 80 - 10.0.0.2 agent 200 0 0 1", n);
        let tokens: Vec<&str> = line.split(' ').collect();
        LogRecord::from_tokens(&tokens, n).unwrap()
    }

    #[test]
    fn test_default_audit_path() {
        let p = default_audit_path(Path::new("/var/log/u_ex231010.log"), AUDIT_SUFFIX);
        assert_eq!(p, PathBuf::from("/var/log/u_ex231010.log_parsed_logs.txt"));
    }

    #[test]
    fn test_append_and_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.txt");
        let writer = AuditWriter::create(&path, false).unwrap();
        writer.append(&record(1)).unwrap();
        writer.append(&record(2)).unwrap();
        writer.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("URIStem:/r1 "));
        assert!(lines[1].contains("URIStem:/r2 "));
    }

    #[test]
    fn test_create_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.txt");
        std::fs::write(&path, "stale\n").unwrap();

        let writer = AuditWriter::create(&path, true).unwrap();
        writer.append(&record(5)).unwrap();
        writer.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(!contents.contains("stale"));
        assert!(contents.starts_with("{Line:5 "));
    }

    #[test]
    fn test_concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.txt");
        let writer = Arc::new(AuditWriter::create(&path, false).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let writer = Arc::clone(&writer);
                thread::spawn(move || {
                    for i in 0..250 {
                        writer.append(&record(t * 1000 + i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        writer.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1000);
        assert!(lines.iter().all(|l| l.starts_with("{Date:") && l.ends_with("TimeTaken:1}")));
    }
}
