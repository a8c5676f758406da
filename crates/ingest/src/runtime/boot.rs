//! Boot: logging init, config load, sink construction.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::cli::Cli;
use crate::conf::{ConfigError, IngestConfig, LogFormat, LoggingConfig, SinkKind};
use crate::sink::{BulkLoadTarget, DiscardSink, PostgresSink};

/// Thread-local subscriber used while the config is being read.
pub fn init_logging_basic() -> tracing::subscriber::DefaultGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ingest=info"));
    let subscriber = fmt().with_env_filter(filter).with_target(false).finish();
    tracing::subscriber::set_default(subscriber)
}

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
pub fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer().json().with_target(true).with_thread_names(true);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        LogFormat::Text => {
            let layer = fmt::layer().with_target(false).with_thread_names(true);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
}

/// Load file and environment config, then apply command-line flags.
pub fn load_config(cli: &Cli) -> Result<IngestConfig> {
    let mut config = IngestConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    config
        .validate()
        .map_err(ConfigError::Invalid)
        .context("Configuration validation failed")?;
    Ok(config)
}

/// Build the configured load target. PostgreSQL targets are checked
/// (and the table created if missing) before any file is read.
pub async fn build_sink(config: &IngestConfig) -> Result<Arc<dyn BulkLoadTarget>> {
    match config.sink.kind {
        SinkKind::Postgres => {
            info!("Connecting to database: {}", config.database.redacted_dsn());
            let sink = PostgresSink::new(&config.database).context("Failed to create connection pool")?;
            sink.ensure_schema()
                .await
                .context("Failed to prepare database schema")?;
            Ok(Arc::new(sink))
        }
        SinkKind::None => {
            warn!("Sink disabled: records are written to audit files only");
            Ok(Arc::new(DiscardSink))
        }
    }
}
