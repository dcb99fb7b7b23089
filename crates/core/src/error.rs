// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{} failure(s): [{}]", .0.len(), .0.join("; "))]
    Aggregate(Vec<String>),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// From implementation for infra crates (to avoid circular dependency)
impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Store(err)
    }
}

// Note: sqlx::Error conversion is handled in the infra-sqlite crate
// by converting to AppError::Store(String)

/// Accumulating error collector: gather every failure, resolve once.
///
/// Construction-time queue startup and the prune pass both surface *all*
/// failures rather than the first one, so a single bad collection cannot
/// hide the state of the others.
#[derive(Debug, Default)]
pub struct ErrorAccumulator {
    errors: Vec<String>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure. The error is flattened to its display form.
    pub fn add(&mut self, err: AppError) {
        self.errors.push(err.to_string());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Consume the accumulator: `Ok(())` if nothing was recorded, otherwise
    /// a single `AppError::Aggregate` carrying every message.
    pub fn resolve(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Aggregate(self.errors))
        }
    }
}
