// Queue Port (Interface)
//
// A queue is an external capability: the group manager creates, caches,
// closes and evicts queues but never touches their jobs.

use crate::error::Result;
use crate::port::driver::Driver;
use crate::shutdown::ShutdownToken;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Job-count introspection exposed by a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: i64,
    pub completed: i64,
}

/// One named work queue backed by a single collection.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Bind the queue to its backing collection. Must be called before
    /// `start`.
    fn set_driver(&self, driver: Box<dyn Driver>) -> Result<()>;

    /// Start processing. A queue must not be started twice.
    async fn start(&self) -> Result<()>;

    /// The queue's worker-execution component.
    fn runner(&self) -> Arc<dyn Runner>;

    /// Current job counts.
    async fn stats(&self) -> QueueStats;
}

/// Worker-execution component of a queue. Closing it stops job processing;
/// the close is bounded by the supplied shutdown token.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn close(&self, shutdown: ShutdownToken);
}

/// Factory callback supplied by the client, invoked once per lazily-created
/// queue.
pub type QueueConstructor =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn Queue>>> + Send + Sync>;

pub mod mocks {
    //! Hand-written mock implementations for tests.

    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Runner that records how often it was closed.
    #[derive(Default)]
    pub struct MockRunner {
        closed: AtomicUsize,
    }

    impl MockRunner {
        pub fn close_count(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Runner for MockRunner {
        async fn close(&self, _shutdown: ShutdownToken) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Queue that records driver binding and start calls.
    pub struct MockQueue {
        runner: Arc<MockRunner>,
        driver: Mutex<Option<Box<dyn Driver>>>,
        started: AtomicUsize,
        fail_start: bool,
    }

    impl MockQueue {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                runner: Arc::new(MockRunner::default()),
                driver: Mutex::new(None),
                started: AtomicUsize::new(0),
                fail_start: false,
            })
        }

        /// A queue whose `start` always fails, for startup-error tests.
        pub fn failing() -> Arc<Self> {
            Arc::new(Self {
                runner: Arc::new(MockRunner::default()),
                driver: Mutex::new(None),
                started: AtomicUsize::new(0),
                fail_start: true,
            })
        }

        pub fn start_count(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        pub fn bound_collection(&self) -> Option<String> {
            self.driver
                .lock()
                .unwrap()
                .as_ref()
                .map(|d| d.collection().to_string())
        }

        pub fn mock_runner(&self) -> Arc<MockRunner> {
            Arc::clone(&self.runner)
        }
    }

    impl Default for MockQueue {
        fn default() -> Self {
            Self {
                runner: Arc::new(MockRunner::default()),
                driver: Mutex::new(None),
                started: AtomicUsize::new(0),
                fail_start: false,
            }
        }
    }

    #[async_trait]
    impl Queue for MockQueue {
        fn set_driver(&self, driver: Box<dyn Driver>) -> Result<()> {
            *self.driver.lock().unwrap() = Some(driver);
            Ok(())
        }

        async fn start(&self) -> Result<()> {
            if self.fail_start {
                return Err(AppError::Queue("mock queue refused to start".into()));
            }
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn runner(&self) -> Arc<dyn Runner> {
            Arc::clone(&self.runner) as Arc<dyn Runner>
        }

        async fn stats(&self) -> QueueStats {
            QueueStats::default()
        }
    }

    /// Constructor producing a fresh `MockQueue` per call, plus a counter of
    /// how many constructions happened and the queues it produced.
    pub fn counting_constructor() -> (QueueConstructor, Arc<ConstructorLog>) {
        let log = Arc::new(ConstructorLog::default());
        let log_inner = Arc::clone(&log);
        let constructor: QueueConstructor = Arc::new(move || {
            let log = Arc::clone(&log_inner);
            Box::pin(async move {
                let queue = MockQueue::new();
                log.record(Arc::clone(&queue));
                Ok(queue as Arc<dyn Queue>)
            })
        });
        (constructor, log)
    }

    /// Constructor whose queues fail to start.
    pub fn failing_constructor() -> QueueConstructor {
        Arc::new(|| Box::pin(async { Ok(MockQueue::failing() as Arc<dyn Queue>) }))
    }

    #[derive(Default)]
    pub struct ConstructorLog {
        queues: Mutex<Vec<Arc<MockQueue>>>,
    }

    impl ConstructorLog {
        fn record(&self, queue: Arc<MockQueue>) {
            self.queues.lock().unwrap().push(queue);
        }

        pub fn count(&self) -> usize {
            self.queues.lock().unwrap().len()
        }

        pub fn queues(&self) -> Vec<Arc<MockQueue>> {
            self.queues.lock().unwrap().clone()
        }
    }
}
