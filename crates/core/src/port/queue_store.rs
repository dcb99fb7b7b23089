// Backing Store Port (Interface)
//
// The three destructive-decision inputs (recent-completed count, pending
// count) and the destructive operation itself (drop) all go through this
// port; the group manager never speaks to the store directly.

use crate::error::Result;
use async_trait::async_trait;

/// Adapter over the persistent store shared across processes.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// List backing collection names starting with `prefix`.
    async fn list_collections(&self, prefix: &str) -> Result<Vec<String>>;

    /// Count documents with `completed = true`, `in_prog = false` and
    /// `mod_ts >= newer_than_millis`.
    async fn count_recently_completed(
        &self,
        collection: &str,
        newer_than_millis: i64,
    ) -> Result<i64>;

    /// Count documents with `completed = false`.
    async fn count_pending(&self, collection: &str) -> Result<i64>;

    /// Drop a collection. Must be idempotent: dropping a collection that a
    /// peer process already dropped is not an error.
    async fn drop_collection(&self, collection: &str) -> Result<()>;
}

pub mod mocks {
    //! Hand-written in-memory store for tests.

    use super::*;
    use crate::domain::JobStatus;
    use crate::error::AppError;
    use crate::port::driver::mocks::NullDriver;
    use crate::port::driver::{Driver, DriverFactory};
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    /// In-memory `QueueStore`: a map of collection name to job documents.
    #[derive(Default)]
    pub struct InMemoryQueueStore {
        collections: Mutex<HashMap<String, Vec<JobStatus>>>,
        dropped: Mutex<Vec<String>>,
        // Collections whose counts fail, for error-aggregation tests.
        failing: Mutex<HashSet<String>>,
    }

    impl InMemoryQueueStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn create_collection(&self, name: impl Into<String>) {
            self.collections
                .lock()
                .unwrap()
                .entry(name.into())
                .or_default();
        }

        pub fn insert(&self, collection: &str, status: JobStatus) {
            self.collections
                .lock()
                .unwrap()
                .entry(collection.to_string())
                .or_default()
                .push(status);
        }

        pub fn remove_collection(&self, collection: &str) {
            self.collections.lock().unwrap().remove(collection);
        }

        pub fn contains(&self, collection: &str) -> bool {
            self.collections.lock().unwrap().contains_key(collection)
        }

        pub fn dropped(&self) -> Vec<String> {
            self.dropped.lock().unwrap().clone()
        }

        /// Make counts against `collection` fail.
        pub fn fail_counts_on(&self, collection: impl Into<String>) {
            self.failing.lock().unwrap().insert(collection.into());
        }

        fn check_failing(&self, collection: &str) -> Result<()> {
            if self.failing.lock().unwrap().contains(collection) {
                return Err(AppError::Store(format!(
                    "injected failure for '{collection}'"
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl QueueStore for InMemoryQueueStore {
        async fn list_collections(&self, prefix: &str) -> Result<Vec<String>> {
            let mut names: Vec<String> = self
                .collections
                .lock()
                .unwrap()
                .keys()
                .filter(|name| name.starts_with(prefix))
                .cloned()
                .collect();
            names.sort();
            Ok(names)
        }

        async fn count_recently_completed(
            &self,
            collection: &str,
            newer_than_millis: i64,
        ) -> Result<i64> {
            self.check_failing(collection)?;
            let collections = self.collections.lock().unwrap();
            let docs = collections.get(collection).map(Vec::as_slice).unwrap_or(&[]);
            Ok(docs
                .iter()
                .filter(|d| d.completed && !d.in_prog && d.mod_ts >= newer_than_millis)
                .count() as i64)
        }

        async fn count_pending(&self, collection: &str) -> Result<i64> {
            self.check_failing(collection)?;
            let collections = self.collections.lock().unwrap();
            let docs = collections.get(collection).map(Vec::as_slice).unwrap_or(&[]);
            Ok(docs.iter().filter(|d| !d.completed).count() as i64)
        }

        async fn drop_collection(&self, collection: &str) -> Result<()> {
            self.collections.lock().unwrap().remove(collection);
            self.dropped.lock().unwrap().push(collection.to_string());
            Ok(())
        }
    }

    /// Driver factory that materializes the backing collection in the
    /// in-memory store on open, like the real store adapters do.
    pub struct StoreBackedDriverFactory {
        store: Arc<InMemoryQueueStore>,
        opened: Mutex<Vec<String>>,
    }

    impl StoreBackedDriverFactory {
        pub fn new(store: Arc<InMemoryQueueStore>) -> Self {
            Self {
                store,
                opened: Mutex::new(Vec::new()),
            }
        }

        pub fn opened(&self) -> Vec<String> {
            self.opened.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DriverFactory for StoreBackedDriverFactory {
        async fn open(&self, collection: &str) -> Result<Box<dyn Driver>> {
            self.store.create_collection(collection);
            self.opened.lock().unwrap().push(collection.to_string());
            Ok(Box::new(NullDriver::new(collection)))
        }
    }
}
