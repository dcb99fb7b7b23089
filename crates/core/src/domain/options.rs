// Store configuration surface

use crate::error::{AppError, Result};

/// Identity of the backing store a queue group operates against.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Logical database name.
    pub database: String,
    /// Connection address (e.g. a file path or URI for the adapter).
    pub uri: String,
}

impl StoreOptions {
    pub fn new(database: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            uri: uri.into(),
        }
    }

    /// A group cannot be constructed against an anonymous store.
    pub fn validate(&self) -> Result<()> {
        if self.database.is_empty() {
            return Err(AppError::Config("no database name specified".into()));
        }
        if self.uri.is_empty() {
            return Err(AppError::Config("no store uri specified".into()));
        }
        Ok(())
    }
}
