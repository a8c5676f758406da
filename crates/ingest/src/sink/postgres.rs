//! PostgreSQL target using binary `COPY` inside one transaction per batch.

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{NoTls, Transaction};
use tracing::{info, warn};

use super::{BulkLoadTarget, SinkError};
use crate::conf::DatabaseConfig;
use crate::parser::{LogRecord, COLUMNS, FIELD_COUNT};

pub struct PostgresSink {
    pool: Pool,
    table: String,
    copy_statement: String,
    column_types: Vec<Type>,
}

impl PostgresSink {
    /// Build the connection pool. Connectivity is not checked until the
    /// first batch or [`PostgresSink::ensure_schema`].
    pub fn new(config: &DatabaseConfig) -> Result<Self, SinkError> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.port)
            .user(&config.user)
            .password(&config.password)
            .dbname(&config.dbname);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(config.max_pool_size)
            .build()
            .map_err(|e| SinkError::Connection(format!("pool creation failed: {e}")))?;

        Ok(Self {
            pool,
            copy_statement: copy_statement(&config.table),
            table: config.table.clone(),
            column_types: vec![Type::TEXT; FIELD_COUNT],
        })
    }

    /// Create the records table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), SinkError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SinkError::Connection(format!("pool get failed: {e}")))?;
        client.batch_execute(&create_statement(&self.table)).await?;
        info!(table = %self.table, "schema ready");
        Ok(())
    }

    async fn copy_rows(&self, tx: &Transaction<'_>, rows: &[LogRecord]) -> Result<u64, SinkError> {
        let sink = tx.copy_in(self.copy_statement.as_str()).await?;
        let writer = BinaryCopyInWriter::new(sink, &self.column_types);
        tokio::pin!(writer);

        for row in rows {
            let fields = row.fields();
            let values: Vec<&(dyn ToSql + Sync)> =
                fields.iter().map(|f| f as &(dyn ToSql + Sync)).collect();
            writer.as_mut().write(&values).await?;
        }

        Ok(writer.finish().await?)
    }
}

#[async_trait]
impl BulkLoadTarget for PostgresSink {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn load_batch(&self, rows: &[LogRecord]) -> Result<u64, SinkError> {
        let mut client = self
            .pool
            .get()
            .await
            .map_err(|e| SinkError::Connection(format!("pool get failed: {e}")))?;
        let tx = client.transaction().await?;

        match self.copy_rows(&tx, rows).await {
            Ok(inserted) => {
                tx.commit().await?;
                Ok(inserted)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

fn copy_statement(table: &str) -> String {
    format!("COPY {} ({}) FROM STDIN BINARY", table, COLUMNS.join(", "))
}

fn create_statement(table: &str) -> String {
    let columns: Vec<String> = COLUMNS.iter().map(|c| format!("{c} TEXT NOT NULL")).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (id BIGSERIAL PRIMARY KEY, {})",
        table,
        columns.join(", ")
    )
}
