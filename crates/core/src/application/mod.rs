// Application Layer - Queue-group management

pub mod group;

// Re-exports
pub use group::{GroupOptions, PrunerLoop, QueueGroup};
