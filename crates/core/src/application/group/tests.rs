// Queue group manager tests, wired against the in-memory port mocks.

use super::*;
use crate::domain::JobStatus;
use crate::port::queue::mocks::{
    counting_constructor, failing_constructor, ConstructorLog, MockQueue,
};
use crate::port::queue_store::mocks::{InMemoryQueueStore, StoreBackedDriverFactory};
use crate::port::time_provider::mocks::FixedTimeProvider;
use crate::port::Runner;
use crate::shutdown::ShutdownToken;
use async_trait::async_trait;

const HOUR: Duration = Duration::from_secs(3600);
const START: i64 = 1_000_000_000;

struct Harness {
    store: Arc<InMemoryQueueStore>,
    drivers: Arc<StoreBackedDriverFactory>,
    time: Arc<FixedTimeProvider>,
    log: Arc<ConstructorLog>,
    constructor: crate::port::QueueConstructor,
}

fn harness() -> Harness {
    let (constructor, log) = counting_constructor();
    let store = Arc::new(InMemoryQueueStore::new());
    Harness {
        drivers: Arc::new(StoreBackedDriverFactory::new(Arc::clone(&store))),
        store,
        time: Arc::new(FixedTimeProvider::new(START)),
        log,
        constructor,
    }
}

fn store_opts() -> StoreOptions {
    StoreOptions::new("plexq-test", "sqlite::memory:")
}

impl Harness {
    fn opts(&self, ttl: Duration, prune_frequency: Duration) -> GroupOptions {
        GroupOptions {
            constructor: Some(self.constructor.clone()),
            prefix: "svc.".to_string(),
            ttl,
            prune_frequency,
        }
    }

    async fn build(&self, ttl: Duration, prune_frequency: Duration) -> Result<Arc<QueueGroup>> {
        QueueGroup::new(
            self.opts(ttl, prune_frequency),
            &store_opts(),
            Arc::clone(&self.store) as Arc<dyn QueueStore>,
            Arc::clone(&self.drivers) as Arc<dyn DriverFactory>,
            Arc::clone(&self.time) as Arc<dyn TimeProvider>,
        )
        .await
    }

    /// Advance the mock clock past the TTL window.
    fn age_past(&self, ttl: Duration) {
        self.time.advance(ttl.as_millis() as i64 + 1);
    }
}

#[tokio::test]
async fn construction_requires_a_constructor() {
    let h = harness();
    let mut opts = h.opts(HOUR, Duration::ZERO);
    opts.constructor = None;
    let err = QueueGroup::new(
        opts,
        &store_opts(),
        Arc::clone(&h.store) as Arc<dyn QueueStore>,
        Arc::clone(&h.drivers) as Arc<dyn DriverFactory>,
        Arc::clone(&h.time) as Arc<dyn TimeProvider>,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Config(_)), "got: {err}");
}

#[tokio::test]
async fn construction_requires_store_identity() {
    let h = harness();
    for bad in [
        StoreOptions::new("", "sqlite::memory:"),
        StoreOptions::new("plexq-test", ""),
    ] {
        let err = QueueGroup::new(
            h.opts(HOUR, Duration::ZERO),
            &bad,
            Arc::clone(&h.store) as Arc<dyn QueueStore>,
            Arc::clone(&h.drivers) as Arc<dyn DriverFactory>,
            Arc::clone(&h.time) as Arc<dyn TimeProvider>,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)), "got: {err}");
    }
}

#[tokio::test]
async fn construction_discovers_existing_collections() {
    let h = harness();
    h.store.create_collection("svc.alpha.jobs");
    h.store.create_collection("svc.beta.jobs");
    h.store.create_collection("other.gamma.jobs"); // outside the prefix

    let group = h.build(HOUR, Duration::ZERO).await.unwrap();
    assert_eq!(h.log.count(), 2, "one queue per discovered collection");

    // Both discovered queues were bound, started, and cached.
    for queue in h.log.queues() {
        assert_eq!(queue.start_count(), 1);
        assert!(queue.bound_collection().is_some());
    }
    let before = h.log.count();
    group.get("alpha").await.unwrap();
    group.get("beta").await.unwrap();
    assert_eq!(h.log.count(), before, "discovered queues are served from cache");
}

#[tokio::test]
async fn construction_fails_atomically_on_startup_errors() {
    let h = harness();
    h.store.create_collection("svc.a.jobs");
    h.store.create_collection("svc.b.jobs");

    let mut opts = h.opts(HOUR, Duration::ZERO);
    opts.constructor = Some(failing_constructor());
    let err = QueueGroup::new(
        opts,
        &store_opts(),
        Arc::clone(&h.store) as Arc<dyn QueueStore>,
        Arc::clone(&h.drivers) as Arc<dyn DriverFactory>,
        Arc::clone(&h.time) as Arc<dyn TimeProvider>,
    )
    .await
    .unwrap_err();

    // Both failures surface, not just the first.
    let msg = err.to_string();
    assert!(matches!(err, AppError::Aggregate(_)), "got: {msg}");
    assert!(msg.contains("svc.a.jobs"), "got: {msg}");
    assert!(msg.contains("svc.b.jobs"), "got: {msg}");
}

#[tokio::test]
async fn get_creates_lazily_and_caches() {
    let h = harness();
    let group = h.build(HOUR, Duration::ZERO).await.unwrap();

    let first = group.get("reports").await.unwrap();
    assert_eq!(h.log.count(), 1);
    assert_eq!(h.drivers.opened(), vec!["svc.reports.jobs".to_string()]);

    let second = group.get("reports").await.unwrap();
    assert_eq!(h.log.count(), 1, "second get must not construct");
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn concurrent_gets_construct_exactly_once() {
    let h = harness();
    let group = h.build(HOUR, Duration::ZERO).await.unwrap();

    let (a, b) = tokio::join!(
        {
            let g = Arc::clone(&group);
            tokio::spawn(async move { g.get("same").await })
        },
        {
            let g = Arc::clone(&group);
            tokio::spawn(async move { g.get("same").await })
        }
    );
    let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());
    assert_eq!(h.log.count(), 1, "double-checked locking lost the race");
    assert!(Arc::ptr_eq(&a, &b));
}

#[tokio::test]
async fn put_rejects_duplicate_id_and_keeps_original() {
    let h = harness();
    let group = h.build(HOUR, Duration::ZERO).await.unwrap();

    let original = MockQueue::new();
    let replacement = MockQueue::new();
    group
        .put("beta", Arc::clone(&original) as Arc<dyn Queue>)
        .await
        .unwrap();
    let err = group
        .put("beta", Arc::clone(&replacement) as Arc<dyn Queue>)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "got: {err}");

    let held = group.get("beta").await.unwrap();
    assert!(Arc::ptr_eq(&held, &(original as Arc<dyn Queue>)));
    // The group never starts a Put queue.
    assert_eq!(replacement.start_count(), 0);
}

#[tokio::test]
async fn concurrent_puts_exactly_one_wins() {
    let h = harness();
    let group = h.build(HOUR, Duration::ZERO).await.unwrap();

    let q1 = MockQueue::new() as Arc<dyn Queue>;
    let q2 = MockQueue::new() as Arc<dyn Queue>;
    let (r1, r2) = tokio::join!(
        {
            let (g, q) = (Arc::clone(&group), Arc::clone(&q1));
            tokio::spawn(async move { g.put("beta", q).await })
        },
        {
            let (g, q) = (Arc::clone(&group), Arc::clone(&q2));
            tokio::spawn(async move { g.put("beta", q).await })
        }
    );
    let (r1, r2) = (r1.unwrap(), r2.unwrap());
    assert!(r1.is_ok() != r2.is_ok(), "exactly one put must win");

    let held = group.get("beta").await.unwrap();
    let winner = if r1.is_ok() { &q1 } else { &q2 };
    assert!(Arc::ptr_eq(&held, winner));
}

#[tokio::test]
async fn prune_drops_never_touched_empty_collection() {
    let h = harness();
    let group = h.build(HOUR, Duration::ZERO).await.unwrap();

    // Created by a peer process after construction: no last-access entry.
    h.store.create_collection("svc.cold.jobs");
    group.prune().await.unwrap();
    assert!(!h.store.contains("svc.cold.jobs"));
    assert_eq!(h.store.dropped(), vec!["svc.cold.jobs".to_string()]);
}

#[tokio::test]
async fn prune_keeps_collections_with_pending_work() {
    let h = harness();
    let group = h.build(HOUR, Duration::ZERO).await.unwrap();

    h.store.create_collection("svc.busy.jobs");
    h.store
        .insert("svc.busy.jobs", JobStatus::pending(h.time.now_millis()));
    group.prune().await.unwrap();
    assert!(h.store.contains("svc.busy.jobs"));

    // In-progress work counts as pending too.
    h.store.create_collection("svc.active.jobs");
    h.store
        .insert("svc.active.jobs", JobStatus::in_progress(h.time.now_millis()));
    group.prune().await.unwrap();
    assert!(h.store.contains("svc.active.jobs"));
}

#[tokio::test]
async fn prune_keeps_recently_completed_work_until_ttl_expires() {
    let h = harness();
    let group = h.build(HOUR, Duration::ZERO).await.unwrap();

    h.store.create_collection("svc.done.jobs");
    h.store
        .insert("svc.done.jobs", JobStatus::completed(h.time.now_millis()));

    group.prune().await.unwrap();
    assert!(h.store.contains("svc.done.jobs"), "completed within TTL");

    h.age_past(HOUR);
    group.prune().await.unwrap();
    assert!(!h.store.contains("svc.done.jobs"), "TTL elapsed");
}

#[tokio::test]
async fn discovered_queue_gets_full_ttl_grace_period() {
    let h = harness();
    // Pre-existing, empty collection; TTL one hour.
    h.store.create_collection("svc.alpha.jobs");
    let group = h.build(HOUR, Duration::ZERO).await.unwrap();
    assert_eq!(h.log.count(), 1);

    // Fresh timestamp: an immediate prune must not evict it.
    group.prune().await.unwrap();
    assert!(h.store.contains("svc.alpha.jobs"));

    // No access for a full TTL: now it goes, and its runner is closed first.
    h.age_past(HOUR);
    group.prune().await.unwrap();
    assert!(!h.store.contains("svc.alpha.jobs"));
    assert_eq!(h.log.queues()[0].mock_runner().close_count(), 1);

    // The registry entry is gone: the next get reconstructs.
    group.get("alpha").await.unwrap();
    assert_eq!(h.log.count(), 2);
}

#[tokio::test]
async fn get_refreshes_the_ttl_clock() {
    let h = harness();
    let group = h.build(HOUR, Duration::ZERO).await.unwrap();
    group.get("reports").await.unwrap();

    h.age_past(HOUR);
    group.get("reports").await.unwrap(); // refresh
    group.prune().await.unwrap();
    assert!(h.store.contains("svc.reports.jobs"), "refreshed queue survives");

    h.age_past(HOUR);
    group.prune().await.unwrap();
    assert!(!h.store.contains("svc.reports.jobs"), "untouched queue is pruned");
}

#[tokio::test]
async fn prune_aggregates_candidate_failures_and_finishes_the_pass() {
    let h = harness();
    let group = h.build(HOUR, Duration::ZERO).await.unwrap();

    h.store.create_collection("svc.bad.jobs");
    h.store.create_collection("svc.ok.jobs");
    h.store.fail_counts_on("svc.bad.jobs");

    let err = group.prune().await.unwrap_err();
    assert!(err.to_string().contains("svc.bad.jobs"), "got: {err}");
    // The healthy candidate was still reclaimed.
    assert!(!h.store.contains("svc.ok.jobs"));
    assert!(h.store.contains("svc.bad.jobs"));
}

#[tokio::test]
async fn prune_evicts_handle_when_peer_dropped_the_collection() {
    let h = harness();
    let group = h.build(HOUR, Duration::ZERO).await.unwrap();
    group.get("shared").await.unwrap();
    assert_eq!(h.log.count(), 1);

    // A concurrent pruner in another process dropped the collection; our
    // registry entry is recently touched, so the pre-filter skips it.
    h.store.remove_collection("svc.shared.jobs");
    group.prune().await.unwrap();

    // The stale local handle was closed and evicted, without a local drop.
    assert_eq!(h.log.queues()[0].mock_runner().close_count(), 1);
    assert!(h.store.dropped().is_empty());
    group.get("shared").await.unwrap();
    assert_eq!(h.log.count(), 2, "evicted id must be reconstructed");
}

#[tokio::test]
async fn close_closes_every_runner_exactly_once() {
    let h = harness();
    let group = h.build(HOUR, Duration::ZERO).await.unwrap();
    group.get("a").await.unwrap();
    group.get("b").await.unwrap();
    let put_queue = MockQueue::new();
    group
        .put("c", Arc::clone(&put_queue) as Arc<dyn Queue>)
        .await
        .unwrap();

    group.close(Duration::from_secs(5)).await;

    for queue in h.log.queues() {
        assert_eq!(queue.mock_runner().close_count(), 1);
    }
    assert_eq!(put_queue.mock_runner().close_count(), 1);
    // Close never drops collections.
    assert!(h.store.dropped().is_empty());
    assert!(h.store.contains("svc.a.jobs"));
}

struct HangingRunner;

#[async_trait]
impl Runner for HangingRunner {
    async fn close(&self, _shutdown: ShutdownToken) {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}

struct HangingQueue {
    runner: Arc<HangingRunner>,
}

#[async_trait]
impl Queue for HangingQueue {
    fn set_driver(&self, _driver: Box<dyn crate::port::Driver>) -> Result<()> {
        Ok(())
    }
    async fn start(&self) -> Result<()> {
        Ok(())
    }
    fn runner(&self) -> Arc<dyn Runner> {
        Arc::clone(&self.runner) as Arc<dyn Runner>
    }
    async fn stats(&self) -> crate::port::QueueStats {
        crate::port::QueueStats::default()
    }
}

#[tokio::test]
async fn close_returns_when_deadline_expires() {
    let h = harness();
    let group = h.build(HOUR, Duration::ZERO).await.unwrap();
    let hanging = Arc::new(HangingQueue {
        runner: Arc::new(HangingRunner),
    });
    group
        .put("stuck", hanging as Arc<dyn Queue>)
        .await
        .unwrap();

    let started = std::time::Instant::now();
    group.close(Duration::from_millis(50)).await;
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "close must not wait for a hung runner past its deadline"
    );
}

#[tokio::test]
async fn prune_after_close_drops_nothing() {
    let h = harness();
    let group = h.build(HOUR, Duration::ZERO).await.unwrap();
    group.close(Duration::from_secs(1)).await;

    // A pass that slipped past Close must leave the store untouched.
    h.store.create_collection("svc.late.jobs");
    group.prune().await.unwrap();
    assert!(h.store.contains("svc.late.jobs"));
    assert!(h.store.dropped().is_empty());
}

#[tokio::test]
async fn pruner_loop_reclaims_idle_queues_in_the_background() {
    let (constructor, _log) = counting_constructor();
    let store = Arc::new(InMemoryQueueStore::new());
    let drivers = Arc::new(StoreBackedDriverFactory::new(Arc::clone(&store)));
    let opts = GroupOptions {
        constructor: Some(constructor),
        prefix: "svc.".to_string(),
        ttl: Duration::from_millis(1),
        prune_frequency: Duration::from_millis(10),
    };
    let group = QueueGroup::new(
        opts,
        &store_opts(),
        Arc::clone(&store) as Arc<dyn QueueStore>,
        Arc::clone(&drivers) as Arc<dyn DriverFactory>,
        Arc::new(crate::port::SystemTimeProvider) as Arc<dyn TimeProvider>,
    )
    .await
    .unwrap();

    // Appears after construction; only the background loop can reclaim it.
    store.create_collection("svc.stale.jobs");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!store.contains("svc.stale.jobs"), "loop never pruned");

    // After close the loop stops firing.
    group.close(Duration::from_secs(1)).await;
    store.create_collection("svc.late.jobs");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(store.contains("svc.late.jobs"), "loop outlived shutdown");
}
