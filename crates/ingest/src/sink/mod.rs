//! Bulk-load targets and the loader that drives them.
//!
//! A target receives whole batches and must apply each one atomically:
//! either every row of the batch becomes visible or none does.

pub mod loader;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::parser::LogRecord;

pub use loader::{BulkLoader, RetryPolicy};
pub use memory::{DiscardSink, MemorySink};
pub use postgres::PostgresSink;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("batch rejected: {0}")]
    Rejected(String),

    #[error("bulk load cancelled")]
    Cancelled,
}

impl SinkError {
    /// Whether another attempt in a fresh transaction may succeed.
    ///
    /// Lost connections, serialization failures and deadlocks are
    /// transient. Constraint and data errors fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::Connection(_) => true,
            SinkError::Database(e) => match e.code() {
                Some(state) => is_transient_sqlstate(state.code()),
                None => true,
            },
            SinkError::Rejected(_) | SinkError::Cancelled => false,
        }
    }
}

/// SQLSTATE codes worth another attempt: class 08 (connection exception),
/// serialization failure, deadlock, too many connections and server
/// shutdown.
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "40001" | "40P01" | "53300" | "57P01" | "57P02" | "57P03")
}

/// Destination for parsed records.
#[async_trait]
pub trait BulkLoadTarget: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Insert all rows in one transaction and return the inserted count.
    ///
    /// On error, none of the rows may remain visible in the store.
    async fn load_batch(&self, rows: &[LogRecord]) -> Result<u64, SinkError>;
}
