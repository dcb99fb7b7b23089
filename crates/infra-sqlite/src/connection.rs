// SQLite Connection Pool Setup

use plexq_core::domain::StoreOptions;
use plexq_core::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Create SQLite connection pool with WAL mode and optimizations
pub async fn create_pool(opts: &StoreOptions) -> Result<SqlitePool> {
    opts.validate()?;

    let connect = SqliteConnectOptions::from_str(&opts.uri)
        .map_err(|e| AppError::Config(format!("invalid store uri '{}': {}", opts.uri, e)))?
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(connect)
        .await
        .map_err(|e| AppError::Store(format!("connecting to '{}': {}", opts.uri, e)))?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_pool() {
        let opts = StoreOptions::new("plexq-test", "sqlite::memory:");
        let pool = create_pool(&opts).await.unwrap();
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_create_pool_rejects_empty_identity() {
        let opts = StoreOptions::new("", "sqlite::memory:");
        assert!(create_pool(&opts).await.is_err());
    }
}
