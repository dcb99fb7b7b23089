// Driver Port (Interface)
//
// A driver binds one queue to one backing collection. The manager only
// opens drivers and hands them to queues; it never reads through them.

use crate::error::Result;
use async_trait::async_trait;

/// Binding between a queue and a specific backing collection.
pub trait Driver: Send + Sync {
    /// Name of the collection this driver is bound to.
    fn collection(&self) -> &str;
}

/// Opens a store-backed driver bound to a specific collection name.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Errors if the connection or collection name is invalid.
    async fn open(&self, collection: &str) -> Result<Box<dyn Driver>>;
}

pub mod mocks {
    //! Hand-written mock implementations for tests.

    use super::*;
    use std::sync::Mutex;

    /// Driver that carries only its collection name.
    pub struct NullDriver {
        collection: String,
    }

    impl NullDriver {
        pub fn new(collection: impl Into<String>) -> Self {
            Self {
                collection: collection.into(),
            }
        }
    }

    impl Driver for NullDriver {
        fn collection(&self) -> &str {
            &self.collection
        }
    }

    /// Factory recording every collection it was asked to open.
    #[derive(Default)]
    pub struct NullDriverFactory {
        opened: Mutex<Vec<String>>,
    }

    impl NullDriverFactory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn opened(&self) -> Vec<String> {
            self.opened.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DriverFactory for NullDriverFactory {
        async fn open(&self, collection: &str) -> Result<Box<dyn Driver>> {
            self.opened.lock().unwrap().push(collection.to_string());
            Ok(Box::new(NullDriver::new(collection)))
        }
    }
}
