// Queue Group Manager
//
// Multiplexes many independent, persistently-backed work queues keyed by
// logical id: lazy creation on first Get, an in-process registry of live
// handles, idle reclamation (Prune) against the store's ground truth, and
// unconditional shutdown (Close).

mod pruner;

pub use pruner::PrunerLoop;

use crate::domain::{naming, QueueId, StoreOptions};
use crate::error::{AppError, ErrorAccumulator, Result};
use crate::port::{DriverFactory, Queue, QueueConstructor, QueueStore, TimeProvider};
use crate::shutdown::{shutdown_channel, ShutdownSender};
use futures::future;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Options for constructing a [`QueueGroup`].
#[derive(Clone)]
pub struct GroupOptions {
    /// Constructor invoked once per lazily-created queue.
    pub constructor: Option<QueueConstructor>,

    /// Namespace prepended to every backing collection name.
    pub prefix: String,

    /// How old a queue's last access (and last completed work) must be for
    /// it to be pruned. Zero disables background pruning.
    pub ttl: Duration,

    /// Cadence of the background prune loop. Zero disables it.
    pub prune_frequency: Duration,
}

impl GroupOptions {
    fn validate(&self) -> Result<()> {
        if self.constructor.is_none() {
            return Err(AppError::Config("no queue constructor specified".into()));
        }
        Ok(())
    }

    fn background_pruning(&self) -> bool {
        self.ttl > Duration::ZERO && self.prune_frequency > Duration::ZERO
    }
}

/// Registry state, guarded by one reader-writer lock.
///
/// `last_access` values are atomics so the Get fast path can stamp a fresh
/// timestamp while holding only the shared lock.
#[derive(Default)]
struct GroupState {
    queues: HashMap<QueueId, Arc<dyn Queue>>,
    last_access: HashMap<QueueId, AtomicI64>,
}

impl GroupState {
    fn touch(&self, id: &str, now: i64) {
        if let Some(ts) = self.last_access.get(id) {
            ts.store(now, Ordering::Relaxed);
        }
    }

    fn register(&mut self, id: &str, queue: Arc<dyn Queue>, now: i64) {
        self.queues.insert(id.to_string(), queue);
        self.last_access
            .insert(id.to_string(), AtomicI64::new(now));
    }

    fn evict(&mut self, id: &str) {
        self.queues.remove(id);
        self.last_access.remove(id);
    }
}

/// A group of persistently-backed queues sharing one namespace prefix.
///
/// One instance per prefix; construct explicitly and share via `Arc`.
pub struct QueueGroup {
    prefix: String,
    ttl: Duration,
    state: RwLock<GroupState>,
    store: Arc<dyn QueueStore>,
    drivers: Arc<dyn DriverFactory>,
    constructor: QueueConstructor,
    time: Arc<dyn TimeProvider>,
    shutdown: ShutdownSender,
}

impl std::fmt::Debug for QueueGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueGroup")
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl QueueGroup {
    /// Construct a ready-to-use queue group.
    ///
    /// When both TTL and prune frequency are positive, one synchronous prune
    /// pass runs before any traffic is accepted, so a restarted process
    /// immediately reclaims queues that went idle while it was down; the
    /// background pruner loop is then spawned. Pre-existing collections under
    /// the prefix are discovered and their queues started; any startup
    /// failure makes construction fail as a whole.
    pub async fn new(
        opts: GroupOptions,
        store_opts: &StoreOptions,
        store: Arc<dyn QueueStore>,
        drivers: Arc<dyn DriverFactory>,
        time: Arc<dyn TimeProvider>,
    ) -> Result<Arc<Self>> {
        opts.validate()?;
        store_opts.validate()?;
        let constructor = opts
            .constructor
            .clone()
            .ok_or_else(|| AppError::Config("no queue constructor specified".into()))?;

        let (shutdown, token) = shutdown_channel();
        let group = Arc::new(Self {
            prefix: opts.prefix.clone(),
            ttl: opts.ttl,
            state: RwLock::new(GroupState::default()),
            store,
            drivers,
            constructor,
            time,
            shutdown,
        });

        if opts.background_pruning() {
            group.prune().await.map_err(|e| {
                AppError::Store(format!("initial prune of queue group failed: {e}"))
            })?;
        }

        let collections = group.store.list_collections(&group.prefix).await?;
        let discovered = collections.len();
        let mut failures = ErrorAccumulator::new();
        {
            let mut state = group.state.write().await;
            for collection in &collections {
                match group.start_queue(collection).await {
                    Ok(queue) => {
                        let id = naming::id_from_collection(&group.prefix, collection);
                        // A fresh timestamp, not the collection's real age:
                        // rediscovered queues get a full TTL grace period.
                        state.register(&id, queue, group.time.now_millis());
                    }
                    Err(e) => failures.add(AppError::Queue(format!(
                        "starting queue for collection '{collection}': {e}"
                    ))),
                }
            }
        }
        failures.resolve()?;

        if opts.background_pruning() {
            let pruner = PrunerLoop::new(Arc::clone(&group), opts.prune_frequency);
            tokio::spawn(pruner.run(token));
        }

        info!(
            prefix = %group.prefix,
            discovered,
            "queue group ready"
        );
        Ok(group)
    }

    /// Construct a queue, bind it to `collection`, and start it.
    async fn start_queue(&self, collection: &str) -> Result<Arc<dyn Queue>> {
        let queue = (self.constructor)()
            .await
            .map_err(|e| AppError::Queue(format!("constructing queue: {e}")))?;
        let driver = self
            .drivers
            .open(collection)
            .await
            .map_err(|e| AppError::Queue(format!("opening driver for '{collection}': {e}")))?;
        queue.set_driver(driver)?;
        queue
            .start()
            .await
            .map_err(|e| AppError::Queue(format!("starting queue for '{collection}': {e}")))?;
        Ok(queue)
    }

    /// Get the queue for `id`, creating it on demand.
    ///
    /// Get stamps the id's last-access time. Note that the caller must add a
    /// job to the queue within the TTL, or else it may have attempted to add
    /// a job to a pruned queue.
    pub async fn get(&self, id: &str) -> Result<Arc<dyn Queue>> {
        {
            let state = self.state.read().await;
            if let Some(queue) = state.queues.get(id) {
                state.touch(id, self.time.now_millis());
                return Ok(Arc::clone(queue));
            }
        }

        let mut state = self.state.write().await;
        // Check again in case the map was modified after we released the
        // read lock.
        if let Some(queue) = state.queues.get(id) {
            state.touch(id, self.time.now_millis());
            return Ok(Arc::clone(queue));
        }

        let collection = naming::collection_from_id(&self.prefix, id);
        let queue = self.start_queue(&collection).await?;
        state.register(id, Arc::clone(&queue), self.time.now_millis());
        info!(id, collection = %collection, "queue created lazily");
        Ok(queue)
    }

    /// Register a caller-supplied, already-started queue under `id`.
    ///
    /// The group does not start or stop a Put queue, though Prune and Close
    /// may still close it once registered.
    pub async fn put(&self, id: &str, queue: Arc<dyn Queue>) -> Result<()> {
        {
            let state = self.state.read().await;
            if state.queues.contains_key(id) {
                return Err(AppError::Conflict(format!(
                    "a queue already exists at id '{id}'"
                )));
            }
        }

        let mut state = self.state.write().await;
        // Check again in case the map was modified after we released the
        // read lock.
        if state.queues.contains_key(id) {
            return Err(AppError::Conflict(format!(
                "a queue already exists at id '{id}'"
            )));
        }

        state.register(id, queue, self.time.now_millis());
        Ok(())
    }

    /// Prune queues that have no pending work and no work completed within
    /// the TTL window, dropping their backing collections.
    ///
    /// The whole pass runs under the exclusive lock; per-candidate store
    /// checks are parallelized across a bounded worker pool. Per-candidate
    /// failures are accumulated and returned together; no single failure
    /// aborts the rest of the pass.
    pub async fn prune(&self) -> Result<()> {
        let mut state = self.state.write().await;
        self.prune_locked(&mut state).await
    }

    async fn prune_locked(&self, state: &mut GroupState) -> Result<()> {
        // A pass that was still waiting for the lock when Close fired must
        // not drop collections behind a closed group.
        if self.shutdown.token().is_shutdown() {
            debug!(prefix = %self.prefix, "prune skipped, group is shut down");
            return Ok(());
        }

        let collections = self
            .store
            .list_collections(&self.prefix)
            .await
            .map_err(|e| AppError::Store(format!("listing collections: {e}")))?;

        let now = self.time.now_millis();
        let ttl_ms = self.ttl.as_millis() as i64;

        // Pre-filter on last access. Recently-touched queues cannot be old
        // enough to prune, so their contents are never queried. An id with
        // no entry at all gets the full check.
        let colls_to_check: Vec<String> = collections
            .iter()
            .filter(|coll| {
                let id = naming::id_from_collection(&self.prefix, coll);
                match state.last_access.get(&id) {
                    None => true,
                    Some(ts) => now - ts.load(Ordering::Relaxed) > ttl_ms,
                }
            })
            .cloned()
            .collect();

        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let window_start = now - ttl_ms;

        let queues = &state.queues;
        let checks: Vec<_> = colls_to_check
            .iter()
            .map(|coll| self.prune_candidate(coll, queues, window_start))
            .collect();
        let results: Vec<Result<Option<QueueId>>> = stream::iter(checks)
            .buffer_unordered(parallelism)
            .collect()
            .await;

        let mut failures = ErrorAccumulator::new();
        let mut reclaimed = 0usize;
        for result in results {
            match result {
                Ok(Some(id)) => {
                    state.evict(&id);
                    reclaimed += 1;
                }
                Ok(None) => {}
                Err(e) => failures.add(e),
            }
        }

        // Another process may have pruned a collection we skipped as
        // recently-touched. Close and evict any registered queue whose
        // collection no longer exists in the store and was not among this
        // pass's candidates: the loser of that race still has to release
        // its stale local handle.
        let checked: HashSet<QueueId> = colls_to_check
            .iter()
            .map(|coll| naming::id_from_collection(&self.prefix, coll))
            .collect();
        let listed: HashSet<&str> = collections.iter().map(String::as_str).collect();
        let stale: Vec<(QueueId, Arc<dyn Queue>)> = state
            .queues
            .iter()
            .filter(|(id, _)| !checked.contains(id.as_str()))
            .filter(|(id, _)| {
                !listed.contains(naming::collection_from_id(&self.prefix, id).as_str())
            })
            .map(|(id, queue)| (id.clone(), Arc::clone(queue)))
            .collect();

        future::join_all(stale.iter().map(|(_, queue)| {
            let token = self.shutdown.token();
            async move { queue.runner().close(token).await }
        }))
        .await;
        for (id, _) in &stale {
            state.evict(id);
        }

        debug!(
            prefix = %self.prefix,
            candidates = colls_to_check.len(),
            reclaimed,
            stale_evicted = stale.len(),
            "prune pass complete"
        );
        failures.resolve()
    }

    /// Check one candidate collection; returns the reclaimed id if it was
    /// idle and its collection was dropped.
    async fn prune_candidate(
        &self,
        collection: &str,
        queues: &HashMap<QueueId, Arc<dyn Queue>>,
        window_start: i64,
    ) -> Result<Option<QueueId>> {
        let recent = self
            .store
            .count_recently_completed(collection, window_start)
            .await
            .map_err(|e| {
                AppError::Store(format!(
                    "counting recently-completed jobs in '{collection}': {e}"
                ))
            })?;
        if recent > 0 {
            return Ok(None);
        }

        let pending = self
            .store
            .count_pending(collection)
            .await
            .map_err(|e| AppError::Store(format!("counting pending jobs in '{collection}': {e}")))?;
        if pending > 0 {
            return Ok(None);
        }

        // Idle (an empty, never-used collection counts as idle too). The
        // live handle is closed before its data goes away.
        let id = naming::id_from_collection(&self.prefix, collection);
        if let Some(queue) = queues.get(&id) {
            queue.runner().close(self.shutdown.token()).await;
        }
        self.store
            .drop_collection(collection)
            .await
            .map_err(|e| AppError::Store(format!("dropping collection '{collection}': {e}")))?;
        info!(id = %id, collection, "pruned idle queue");
        Ok(Some(id))
    }

    /// Unconditional shutdown: cancel background activity, then close every
    /// registered queue's runner concurrently, waiting until all finish or
    /// `deadline` elapses, whichever comes first.
    ///
    /// Close never drops backing collections; that remains Prune's job.
    pub async fn close(&self, deadline: Duration) {
        self.shutdown.shutdown();

        let drained: Vec<Arc<dyn Queue>> = {
            let mut state = self.state.write().await;
            state.last_access.clear();
            state.queues.drain().map(|(_, queue)| queue).collect()
        };

        let count = drained.len();
        let closes = future::join_all(drained.into_iter().map(|queue| {
            let token = self.shutdown.token();
            async move { queue.runner().close(token).await }
        }));
        let finished = tokio::time::timeout(deadline, closes).await.is_ok();
        info!(queues = count, finished, "queue group closed");
    }
}

#[cfg(test)]
mod tests;
