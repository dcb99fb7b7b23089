// Time Provider Port (for testability)

/// Time provider interface (allows mocking in tests)
pub trait TimeProvider: Send + Sync {
    /// Get current time in milliseconds since epoch
    fn now_millis(&self) -> i64;
}

/// System time provider (production)
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

pub mod mocks {
    //! Controllable clock for TTL tests.

    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    pub struct FixedTimeProvider {
        millis: AtomicI64,
    }

    impl FixedTimeProvider {
        pub fn new(millis: i64) -> Self {
            Self {
                millis: AtomicI64::new(millis),
            }
        }

        pub fn set(&self, millis: i64) {
            self.millis.store(millis, Ordering::SeqCst);
        }

        pub fn advance(&self, delta_millis: i64) {
            self.millis.fetch_add(delta_millis, Ordering::SeqCst);
        }
    }

    impl TimeProvider for FixedTimeProvider {
        fn now_millis(&self) -> i64 {
            self.millis.load(Ordering::SeqCst)
        }
    }
}
