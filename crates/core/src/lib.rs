// plexq Core - Queue-group domain logic and ports
// NO infrastructure dependencies (Hexagonal Architecture)

pub mod application;
pub mod domain;
pub mod error;
pub mod port;
pub mod shutdown;

pub use application::group::{GroupOptions, PrunerLoop, QueueGroup};
pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
