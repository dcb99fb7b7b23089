// Domain Layer - Pure business logic and entities

pub mod job;
pub mod naming;
pub mod options;

// Re-exports
pub use job::{JobStatus, QueueId};
pub use options::StoreOptions;
