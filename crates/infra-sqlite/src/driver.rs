// SQLite Driver Implementation
//
// A driver binds one queue to one collection table. Opening a driver
// creates the table if missing, so a lazily-created queue has a
// discoverable backing collection immediately.

use crate::queue_store::ensure_collection;
use async_trait::async_trait;
use plexq_core::error::Result;
use plexq_core::port::{Driver, DriverFactory};
use sqlx::SqlitePool;

pub struct SqliteDriver {
    pool: SqlitePool,
    collection: String,
}

impl SqliteDriver {
    /// Connection pool for queue implementations reading through this
    /// driver.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl Driver for SqliteDriver {
    fn collection(&self) -> &str {
        &self.collection
    }
}

pub struct SqliteDriverFactory {
    pool: SqlitePool,
}

impl SqliteDriverFactory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DriverFactory for SqliteDriverFactory {
    async fn open(&self, collection: &str) -> Result<Box<dyn Driver>> {
        ensure_collection(&self.pool, collection).await?;
        tracing::debug!(collection, "opened driver");
        Ok(Box::new(SqliteDriver {
            pool: self.pool.clone(),
            collection: collection.to_string(),
        }))
    }
}
