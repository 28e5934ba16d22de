pub mod conversation_repository;
pub mod message_repository;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{error, info};

use crate::errors::AppError;

/// Owns the connection pool. Opened once at startup and closed at shutdown;
/// repositories borrow clones of the pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn open(url: &str) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(AppError::DatabaseConnectionFailed)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                error!("Failed to connect to {url}: {e}");
                AppError::DatabaseConnectionFailed(e)
            })?;

        Self::migrate(pool).await
    }

    /// Private in-memory database. A single long-lived connection keeps the
    /// data alive for as long as the pool is.
    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(AppError::DatabaseConnectionFailed)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(AppError::DatabaseConnectionFailed)?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, AppError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(AppError::MigrationFailed)?;
        info!("Database ready and migrations applied");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database closed");
    }
}
