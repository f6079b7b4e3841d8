//! Database operations and connection management

use anyhow::{Context, Result};
use config::DatabaseConfig;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    ConnectOptions, Pool, Sqlite,
};
use std::time::Duration;

/// Database connection manager
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Create a new database connection
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let mut options = SqliteConnectOptions::new()
            .filename(config.url.strip_prefix("sqlite:").unwrap_or(&config.url))
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(if config.wal_mode {
                SqliteJournalMode::Wal
            } else {
                SqliteJournalMode::Delete
            });

        if !config.log_statements {
            options = options.disable_statement_logging();
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        Ok(Self { pool })
    }

    /// Create a migrated in-memory database
    #[cfg(test)]
    pub async fn new_in_memory() -> Result<Self> {
        // Every connection to :memory: is a separate database, so keep exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to create in-memory database")?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bundles (
                bundle_id INTEGER PRIMARY KEY AUTOINCREMENT,
                version_id INTEGER NOT NULL,
                gamespace_id INTEGER NOT NULL,
                bundle_name TEXT NOT NULL,
                bundle_status TEXT NOT NULL DEFAULT 'CREATED',
                bundle_hash TEXT,
                bundle_url TEXT,
                bundle_size INTEGER,
                bundle_filters TEXT NOT NULL DEFAULT '{}',
                bundle_payload TEXT NOT NULL DEFAULT '{}',
                bundle_key TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create bundles table")?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_bundles_scope_name
            ON bundles (gamespace_id, version_id, bundle_name)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create bundle name index")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_bundles_scope_status
            ON bundles (gamespace_id, version_id, bundle_status)
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create bundle status index")?;

        Ok(())
    }

    /// Perform a health check on the database
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    /// Close the database connection
    pub async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    /// Get the database pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}
