//! SQL document mirror (secondary store)
//!
//! Provides:
//! - SeaORM entity for document records
//! - Connection management and schema bootstrap
//! - A `DocumentStore` implementation over the connection

pub mod models;
mod repository;

pub use repository::SqlDocumentStore;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::time::Duration;
use tracing::info;

/// Database connection wrapper
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Connect using the configured connection string
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to secondary store database...");

        let mut opts = ConnectOptions::new(url);
        opts
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let conn = Database::connect(opts)
            .await
            .map_err(|e| AppError::store("sql", format!("Failed to connect: {}", e)))?;

        let pool = Self { conn };
        pool.ensure_schema().await?;

        info!("Secondary store connection established");
        Ok(pool)
    }

    /// Create the documents table from the entity definition if missing
    async fn ensure_schema(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        let schema = Schema::new(backend);
        let mut table = schema.create_table_from_entity(models::DocumentEntity);
        table.if_not_exists();

        self.conn.execute(backend.build(&table)).await?;
        Ok(())
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.conn
            .ping()
            .await
            .map_err(|e| AppError::store("sql", format!("Ping failed: {}", e)))
    }
}
