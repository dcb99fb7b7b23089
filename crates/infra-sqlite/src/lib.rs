// plexq Infrastructure - SQLite Adapter
// Implements: QueueStore, DriverFactory

mod connection;
mod driver;
mod queue_store;

pub use connection::create_pool;
pub use driver::{SqliteDriver, SqliteDriverFactory};
pub use queue_store::SqliteQueueStore;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
