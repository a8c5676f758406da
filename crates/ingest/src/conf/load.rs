//! Load: config loading from file and environment variables.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::model::IngestConfig;

const DEFAULT_CONFIG_FILE: &str = "/etc/ingest/ingest.toml";
const LOCAL_ENV_FILE: &str = ".env.local";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl IngestConfig {
    /// Load configuration from file or environment variables.
    /// Priority: Environment Variables > Config File > Defaults
    ///
    /// Outside production (`INGEST_ENV=production`), variables from
    /// `.env.local` are loaded first without overriding the process
    /// environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Like [`IngestConfig::load`], but an explicit `path` must exist.
    ///
    /// The merged result is validated; see [`ConfigError::Invalid`].
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        if std::env::var("INGEST_ENV").as_deref() != Ok("production") {
            if let Ok(env_path) = dotenvy::from_filename(LOCAL_ENV_FILE) {
                tracing::info!("Loaded environment from: {}", env_path.display());
            }
        }

        let mut config = match path {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::from_file(path)?
            }
            None => {
                let config_path = std::env::var("INGEST_CONFIG_FILE")
                    .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
                if Path::new(&config_path).exists() {
                    tracing::info!("Loading configuration from: {}", config_path);
                    Self::from_file(&config_path)?
                } else {
                    tracing::info!("Config file not found at {}, using environment variables", config_path);
                    Self::default()
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `INGEST_*` and `DB_*` overrides. Unparseable values are
    /// ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |key: &str| -> Option<String> { lookup(key).filter(|v| !v.is_empty()) };

        if let Some(v) = parsed("INGEST_WORKERS") {
            set_parsed(&mut self.pipeline.workers, "INGEST_WORKERS", &v);
        }
        if let Some(v) = parsed("INGEST_BATCH_SIZE") {
            set_parsed(&mut self.pipeline.batch_size, "INGEST_BATCH_SIZE", &v);
        }
        if let Some(v) = parsed("INGEST_LOAD_RETRIES") {
            set_parsed(&mut self.pipeline.load_retries, "INGEST_LOAD_RETRIES", &v);
        }
        if let Some(v) = parsed("INGEST_SINK") {
            set_parsed(&mut self.sink.kind, "INGEST_SINK", &v);
        }
        if let Some(v) = parsed("INGEST_LOG_FORMAT") {
            set_parsed(&mut self.logging.format, "INGEST_LOG_FORMAT", &v);
        }
        if let Some(v) = parsed("DB_HOST") {
            self.database.host = v;
        }
        if let Some(v) = parsed("DB_PORT") {
            set_parsed(&mut self.database.port, "DB_PORT", &v);
        }
        if let Some(v) = parsed("DB_USER") {
            self.database.user = v;
        }
        if let Some(v) = lookup("DB_PASS") {
            self.database.password = v;
        }
        if let Some(v) = parsed("DB_NAME") {
            self.database.dbname = v;
        }
        if let Some(v) = parsed("DB_TABLE") {
            self.database.table = v;
        }
        if let Some(v) = parsed("DB_POOL_SIZE") {
            set_parsed(&mut self.database.max_pool_size, "DB_POOL_SIZE", &v);
        }
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, key: &str, value: &str) {
    match value.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!("Ignoring invalid value for {}: {:?}", key, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::{LogFormat, SinkKind};
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    // ── Overrides ────────────────────────────────────────────────

    #[test]
    fn test_overrides_apply() {
        let vars = env(&[
            ("INGEST_WORKERS", "12"),
            ("INGEST_BATCH_SIZE", "250"),
            ("INGEST_SINK", "none"),
            ("INGEST_LOG_FORMAT", "json"),
            ("DB_HOST", "db.internal"),
            ("DB_PORT", "6543"),
            ("DB_USER", "loader"),
            ("DB_PASS", "secret"),
            ("DB_NAME", "weblogs"),
        ]);
        let mut cfg = IngestConfig::default();
        cfg.apply_overrides(|k| vars.get(k).cloned());

        assert_eq!(cfg.pipeline.workers, 12);
        assert_eq!(cfg.pipeline.batch_size, 250);
        assert_eq!(cfg.sink.kind, SinkKind::None);
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.database.host, "db.internal");
        assert_eq!(cfg.database.port, 6543);
        assert_eq!(cfg.database.user, "loader");
        assert_eq!(cfg.database.password, "secret");
        assert_eq!(cfg.database.dbname, "weblogs");
    }

    #[test]
    fn test_invalid_override_keeps_previous_value() {
        let vars = env(&[("INGEST_WORKERS", "many"), ("DB_PORT", "99999")]);
        let mut cfg = IngestConfig::default();
        cfg.apply_overrides(|k| vars.get(k).cloned());

        assert_eq!(cfg.pipeline.workers, 4);
        assert_eq!(cfg.database.port, 5432);
    }

    #[test]
    fn test_empty_override_ignored() {
        let vars = env(&[("DB_HOST", "")]);
        let mut cfg = IngestConfig::default();
        cfg.apply_overrides(|k| vars.get(k).cloned());
        assert_eq!(cfg.database.host, "localhost");
    }

    // ── File loading ─────────────────────────────────────────────

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.toml");
        fs::write(&path, "[pipeline]\nworkers = 2\n\n[database]\ntable = \"public.iis\"\n").unwrap();

        let cfg = IngestConfig::from_file(&path).unwrap();
        assert_eq!(cfg.pipeline.workers, 2);
        assert_eq!(cfg.database.table, "public.iis");
    }

    #[test]
    fn test_from_file_missing() {
        let err = IngestConfig::from_file("/nonexistent/ingest.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_from_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.toml");
        fs::write(&path, "[pipeline]\nbatch_size = 0\n").unwrap();

        let err = IngestConfig::load_from(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("batch_size")), "{:?}", err);
    }

    #[test]
    fn test_from_file_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.toml");
        fs::write(&path, "[pipeline\nworkers = ").unwrap();

        let err = IngestConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
