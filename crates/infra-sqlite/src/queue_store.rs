// SQLite QueueStore Implementation
//
// One table per backing collection. Status columns mirror the cross-process
// document contract: status_completed, status_in_prog, status_mod_ts.

use async_trait::async_trait;
use plexq_core::domain::JobStatus;
use plexq_core::error::{AppError, Result};
use plexq_core::port::QueueStore;
use sqlx::SqlitePool;

// Helper to convert sqlx::Error to AppError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                AppError::Store(format!("database error [{}]: {}", code, db_err.message()))
            } else {
                AppError::Store(format!("database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Store("row not found".to_string()),
        _ => AppError::Store(err.to_string()),
    }
}

/// A count against a concurrently-dropped table reads as zero, matching the
/// race-tolerant prune semantics.
fn is_missing_table(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.message().contains("no such table"))
}

/// Table names cannot be bound as SQL parameters, so they are interpolated
/// as quoted identifiers after validation.
pub(crate) fn quoted_ident(name: &str) -> Result<String> {
    if name.is_empty() || name.contains('"') || name.contains('\0') {
        return Err(AppError::Validation(format!(
            "invalid collection name: {name:?}"
        )));
    }
    Ok(format!("\"{name}\""))
}

/// Create the backing table for a collection if it does not exist yet.
pub(crate) async fn ensure_collection(pool: &SqlitePool, collection: &str) -> Result<()> {
    let table = quoted_ident(collection)?;
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id TEXT PRIMARY KEY,
            payload TEXT NOT NULL DEFAULT '{{}}',
            status_completed INTEGER NOT NULL DEFAULT 0,
            status_in_prog INTEGER NOT NULL DEFAULT 0,
            status_mod_ts INTEGER NOT NULL DEFAULT 0
        )
        "#
    ))
    .execute(pool)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

/// Escape LIKE wildcards so a prefix matches literally.
fn escape_like(prefix: &str) -> String {
    prefix
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an empty backing collection. Mostly useful for seeding tests
    /// and peer-process simulations.
    pub async fn create_collection(&self, collection: &str) -> Result<()> {
        ensure_collection(&self.pool, collection).await
    }

    /// Insert one job document into a collection.
    pub async fn insert_job(
        &self,
        collection: &str,
        id: &str,
        payload: &serde_json::Value,
        status: JobStatus,
    ) -> Result<()> {
        let table = quoted_ident(collection)?;
        let payload = serde_json::to_string(payload)?;
        sqlx::query(&format!(
            r#"
            INSERT INTO {table} (id, payload, status_completed, status_in_prog, status_mod_ts)
            VALUES (?, ?, ?, ?, ?)
            "#
        ))
        .bind(id)
        .bind(payload)
        .bind(status.completed)
        .bind(status.in_prog)
        .bind(status.mod_ts)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn list_collections(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}%", escape_like(prefix));
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table'
              AND name LIKE ? ESCAPE '\'
              AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
            ORDER BY name
            "#,
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(names)
    }

    async fn count_recently_completed(
        &self,
        collection: &str,
        newer_than_millis: i64,
    ) -> Result<i64> {
        let table = quoted_ident(collection)?;
        let count = sqlx::query_scalar::<_, i64>(&format!(
            r#"
            SELECT COUNT(*) FROM {table}
            WHERE status_completed = 1
              AND status_in_prog = 0
              AND status_mod_ts >= ?
            "#
        ))
        .bind(newer_than_millis)
        .fetch_one(&self.pool)
        .await;
        match count {
            Ok(n) => Ok(n),
            Err(e) if is_missing_table(&e) => Ok(0),
            Err(e) => Err(map_sqlx_error(e)),
        }
    }

    async fn count_pending(&self, collection: &str) -> Result<i64> {
        let table = quoted_ident(collection)?;
        let count = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM {table} WHERE status_completed = 0"
        ))
        .fetch_one(&self.pool)
        .await;
        match count {
            Ok(n) => Ok(n),
            Err(e) if is_missing_table(&e) => Ok(0),
            Err(e) => Err(map_sqlx_error(e)),
        }
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        let table = quoted_ident(collection)?;
        // IF EXISTS keeps the drop idempotent when racing a peer pruner.
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        tracing::debug!(collection, "dropped backing collection");
        Ok(())
    }
}
