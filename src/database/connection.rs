use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Connection pools for the operational database and the local store
#[derive(Debug, Clone)]
pub struct DatabasePools {
    source: PgPool,
    local: PgPool,
}

impl DatabasePools {
    /// Connect both pools. Sessions on the source pool default to read-only transactions.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let statement_timeout = config.statement_timeout_ms.to_string();

        let source_options = PgConnectOptions::from_str(&config.source_url)?.options([
            ("default_transaction_read_only", "on"),
            ("statement_timeout", statement_timeout.as_str()),
        ]);
        let local_options = PgConnectOptions::from_str(&config.local_url)?
            .options([("statement_timeout", statement_timeout.as_str())]);

        let source = Self::pool_options(config)
            .connect_with(source_options)
            .await?;
        let local = Self::pool_options(config).connect_with(local_options).await?;

        info!(
            max_connections = config.max_connections,
            statement_timeout_ms = config.statement_timeout_ms,
            "🔌 Database pools connected"
        );

        Ok(Self { source, local })
    }

    fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
    }

    pub fn source(&self) -> &PgPool {
        &self.source
    }

    pub fn local(&self) -> &PgPool {
        &self.local
    }

    pub async fn close(&self) {
        self.source.close().await;
        self.local.close().await;
    }
}
