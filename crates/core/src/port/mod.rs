// Port Layer - Interfaces for external dependencies

pub mod driver;
pub mod queue;
pub mod queue_store;
pub mod time_provider;

// Re-exports
pub use driver::{Driver, DriverFactory};
pub use queue::{Queue, QueueConstructor, QueueStats, Runner};
pub use queue_store::QueueStore;
pub use time_provider::{SystemTimeProvider, TimeProvider};
