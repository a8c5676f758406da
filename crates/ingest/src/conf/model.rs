//! Model: IngestConfig and related structs.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audit::AUDIT_SUFFIX;
use crate::sink::RetryPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub pipeline: PipelineConfig,
    pub sink: SinkConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Parse workers. Batchers get half as many, at least one.
    pub workers: usize,
    pub batch_size: usize,
    pub audit_suffix: String,
    /// Prefix each audit line with its source line number.
    pub audit_line_numbers: bool,
    /// Extra attempts for a failed batch, each in a fresh transaction.
    pub load_retries: u32,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    #[default]
    Postgres,
    /// Write the audit file only.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    /// Target table, optionally schema-qualified.
    pub table: String,
    pub max_pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is unset.
    pub filter: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 10_000,
            audit_suffix: AUDIT_SUFFIX.to_string(),
            audit_line_numbers: false,
            load_retries: 0,
            retry_backoff_ms: 250,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "".to_string(),
            dbname: "logs".to_string(),
            table: "log_entries".to_string(),
            max_pool_size: 16,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "ingest=info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl PipelineConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    pub fn parse_workers(&self) -> usize {
        self.workers
    }

    pub fn batch_workers(&self) -> usize {
        (self.workers / 2).max(1)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.load_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("pipeline.workers must be > 0".to_string());
        }
        if self.batch_size == 0 {
            return Err("pipeline.batch_size must be > 0".to_string());
        }
        if self.audit_suffix.is_empty() {
            return Err("pipeline.audit_suffix must not be empty".to_string());
        }
        Ok(())
    }
}

impl DatabaseConfig {
    /// Connection string with the password masked, for logs.
    pub fn redacted_dsn(&self) -> String {
        format!(
            "host={} port={} user={} password=*** dbname={}",
            self.host, self.port, self.user, self.dbname
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("database.host must not be empty".to_string());
        }
        if self.port == 0 {
            return Err("database.port must be > 0".to_string());
        }
        if self.max_pool_size == 0 {
            return Err("database.max_pool_size must be > 0".to_string());
        }
        if !is_identifier(&self.table) {
            return Err(format!("database.table is not a valid identifier: {:?}", self.table));
        }
        Ok(())
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.pipeline.validate()?;
        if self.sink.kind == SinkKind::Postgres {
            self.database.validate()?;
        }
        Ok(())
    }
}

/// `name` or `schema.name`, each part `[A-Za-z_][A-Za-z0-9_]*`.
fn is_identifier(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|p| {
            let mut chars = p.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "batch" => Ok(SinkKind::Postgres),
            "none" => Ok(SinkKind::None),
            other => Err(format!("unknown sink kind: {other} (expected postgres or none)")),
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Postgres => write!(f, "postgres"),
            SinkKind::None => write!(f, "none"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other} (expected text or json)")),
        }
    }
}
