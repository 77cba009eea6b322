//! The generic service driver loop.
//!
//! Each service (sync, priority-sync, monitor) needs the same
//! working-set/sharding/shutdown machinery with only the per-item work
//! differing. This generalizes that into a single engine (`run_service`)
//! parameterized by a [`ServiceKind`]: one control plane driving multiple
//! scan kinds instead of one hand-rolled loop per kind.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, FuturesUnordered, StreamExt};
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::shutdown::ShutdownWatch;
use crate::store::Store;
use crate::types::Relay;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Parallel workers per iteration; defaults to the core count.
    pub worker_count: usize,
    /// Concurrent relay tasks per worker, bounded cooperatively.
    pub worker_concurrency: usize,
    /// Work-channel capacity; should be at least `worker_count *
    /// worker_concurrency` so no worker ever starves waiting on the channel.
    pub channel_capacity: usize,
    /// Per-relay-task deadline.
    pub task_deadline: Duration,
    /// Sleep between iterations once one completes.
    pub loop_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let worker_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            worker_count,
            worker_concurrency: 10,
            channel_capacity: worker_count * 10,
            task_deadline: Duration::from_secs(40),
            loop_interval: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IterationStats {
    pub relays_processed: u64,
    pub relays_failed: u64,
}

/// One of the five services (sync, priority-sync, monitor, finder,
/// initializer) expressed as a working-set query plus a per-relay unit of
/// work. `run_service` owns everything else: sharding, shutdown
/// coordination, deadlines, and `ServiceState` checkpointing.
#[async_trait]
pub trait ServiceKind: Send + Sync {
    /// Name persisted to `service_state` and attached to every log line.
    fn name(&self) -> &str;

    /// The working set for one iteration, streamed rather than
    /// materialized (same contract as `Store::list_relays_for_sync`).
    fn working_set<'a>(&'a self, store: &'a dyn Store) -> BoxStream<'a, Result<Relay, StoreError>>;

    /// Process one relay. Errors are logged and counted against the
    /// iteration; they never abort the service loop.
    async fn process_one(&self, store: &dyn Store, relay: &Relay) -> anyhow::Result<()>;
}

/// Drive `kind` until `shutdown` fires: each iteration drains the working
/// set into a bounded channel, runs it through `config.worker_count`
/// workers, persists a `ServiceState` checkpoint, then sleeps
/// `config.loop_interval` (waking early on shutdown).
pub async fn run_service(
    kind: Arc<dyn ServiceKind>,
    store: Arc<dyn Store>,
    config: SchedulerConfig,
    mut shutdown: ShutdownWatch,
) {
    while !shutdown.is_triggered() {
        let started_at = crate::events::unix_now();
        let stats = run_iteration(Arc::clone(&kind), Arc::clone(&store), &config, shutdown.clone()).await;

        tracing::info!(
            service = kind.name(),
            relays_processed = stats.relays_processed,
            relays_failed = stats.relays_failed,
            "service iteration complete"
        );

        let state = serde_json::json!({
            "last_run_at": started_at,
            "relays_processed": stats.relays_processed,
            "relays_failed": stats.relays_failed,
        });
        if let Err(e) = store.save_service_state(kind.name(), &state, started_at).await {
            tracing::warn!(service = kind.name(), error = %e, "failed to persist service state");
        }

        tokio::select! {
            _ = tokio::time::sleep(config.loop_interval) => {}
            _ = shutdown.cancelled() => break,
        }
    }
}

async fn run_iteration(
    kind: Arc<dyn ServiceKind>,
    store: Arc<dyn Store>,
    config: &SchedulerConfig,
    shutdown: ShutdownWatch,
) -> IterationStats {
    let (tx, rx) = mpsc::channel::<Relay>(config.channel_capacity.max(1));
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let stats = Arc::new(Mutex::new(IterationStats::default()));

    let producer = {
        let kind = Arc::clone(&kind);
        let store = Arc::clone(&store);
        let mut shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut stream = kind.working_set(store.as_ref());
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    item = stream.next() => match item {
                        Some(Ok(relay)) => {
                            if tx.send(relay).await.is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(service = kind.name(), error = %e, "working set query failed");
                            break;
                        }
                        None => break,
                    },
                }
            }
        })
    };

    let mut worker_handles = Vec::with_capacity(config.worker_count);
    for _ in 0..config.worker_count.max(1) {
        worker_handles.push(tokio::spawn(worker_loop(
            Arc::clone(&rx),
            Arc::clone(&kind),
            Arc::clone(&store),
            config.worker_concurrency.max(1),
            config.task_deadline,
            shutdown.clone(),
            Arc::clone(&stats),
        )));
    }

    let _ = producer.await;
    for handle in worker_handles {
        let _ = handle.await;
    }

    Arc::try_unwrap(stats)
        .map(|m| m.into_inner().unwrap_or_default())
        .unwrap_or_default()
}

/// A single worker: cooperatively runs up to `concurrency` relay tasks at
/// once, pulling new work from `rx` as slots free up. Workers never spawn
/// OS threads of their own — concurrency within a worker comes from
/// interleaving futures on one task, matching the single-threaded
/// cooperative model.
async fn worker_loop(
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Relay>>>,
    kind: Arc<dyn ServiceKind>,
    store: Arc<dyn Store>,
    concurrency: usize,
    task_deadline: Duration,
    mut shutdown: ShutdownWatch,
    stats: Arc<Mutex<IterationStats>>,
) {
    let mut in_flight = FuturesUnordered::new();

    loop {
        while in_flight.len() < concurrency && !shutdown.is_triggered() {
            let next = rx.lock().await.try_recv();
            match next {
                Ok(relay) => in_flight.push(run_one(Arc::clone(&kind), Arc::clone(&store), relay, task_deadline)),
                Err(_) => break,
            }
        }

        if in_flight.is_empty() {
            let next = {
                let mut guard = rx.lock().await;
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => None,
                    item = guard.recv() => item,
                }
            };
            match next {
                Some(relay) => in_flight.push(run_one(Arc::clone(&kind), Arc::clone(&store), relay, task_deadline)),
                None => break,
            }
            continue;
        }

        tokio::select! {
            Some(outcome) = in_flight.next() => {
                apply_outcome(&stats, outcome);
            }
            _ = shutdown.cancelled() => break,
        }
    }

    // Drain whatever is already running to completion instead of abandoning
    // open sockets/DB handles; each task is still bounded by its own
    // deadline, so this cannot hang indefinitely.
    while let Some(outcome) = in_flight.next().await {
        apply_outcome(&stats, outcome);
    }
}

struct TaskOutcome {
    relay_url: String,
    result: Result<(), TaskFailure>,
}

enum TaskFailure {
    Failed(anyhow::Error),
    DeadlineExceeded,
}

/// Run one relay task under `deadline`. On timeout, `tokio::time::timeout`
/// drops the inner future, which releases whatever `RelayConnection`/DB
/// handle it held via their own `Drop` impls, with no extra bookkeeping.
async fn run_one(kind: Arc<dyn ServiceKind>, store: Arc<dyn Store>, relay: Relay, deadline: Duration) -> TaskOutcome {
    let relay_url = relay.url.clone();
    let result = match tokio::time::timeout(deadline, kind.process_one(store.as_ref(), &relay)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TaskFailure::Failed(e)),
        Err(_) => Err(TaskFailure::DeadlineExceeded),
    };
    TaskOutcome { relay_url, result }
}

fn apply_outcome(stats: &Arc<Mutex<IterationStats>>, outcome: TaskOutcome) {
    let mut guard = stats.lock().unwrap();
    match outcome.result {
        Ok(()) => guard.relays_processed += 1,
        Err(TaskFailure::Failed(e)) => {
            guard.relays_failed += 1;
            tracing::warn!(relay_url = %outcome.relay_url, error = %e, "relay task failed");
        }
        Err(TaskFailure::DeadlineExceeded) => {
            guard.relays_failed += 1;
            tracing::warn!(relay_url = %outcome.relay_url, "relay task deadline exceeded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Network;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingService {
        relays: Vec<Relay>,
        processed: Arc<AtomicU64>,
    }

    #[async_trait]
    impl ServiceKind for CountingService {
        fn name(&self) -> &str {
            "test-service"
        }

        fn working_set<'a>(&'a self, _store: &'a dyn Store) -> BoxStream<'a, Result<Relay, StoreError>> {
            Box::pin(futures::stream::iter(self.relays.clone().into_iter().map(Ok)))
        }

        async fn process_one(&self, _store: &dyn Store, _relay: &Relay) -> anyhow::Result<()> {
            self.processed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct NoopStore;

    #[async_trait]
    impl Store for NoopStore {
        async fn upsert_relay(&self, _url: &str, _network: Network, _inserted_at: i64) -> Result<(), StoreError> {
            Ok(())
        }
        async fn upsert_event(&self, _event: &crate::types::Event, _relay_url: &str, _seen_at: i64) -> Result<(), StoreError> {
            Ok(())
        }
        async fn upsert_events_batch(&self, _events: &[crate::types::Event], _relay_url: &str, _seen_at: i64) -> Result<(), StoreError> {
            Ok(())
        }
        async fn upsert_relay_metadata(&self, _snapshot: &crate::types::RelayMetadataSnapshot) -> Result<(), StoreError> {
            Ok(())
        }
        fn list_relays_for_sync<'a>(&'a self, _freshness_cutoff: i64, _readable_only: bool, _shuffle: bool) -> BoxStream<'a, Result<Relay, StoreError>> {
            Box::pin(futures::stream::empty())
        }
        fn list_relays_for_metadata<'a>(&'a self, _freshness_cutoff: i64) -> BoxStream<'a, Result<Relay, StoreError>> {
            Box::pin(futures::stream::empty())
        }
        async fn get_last_seen_created_at(&self, _relay_url: &str) -> Result<Option<i64>, StoreError> {
            Ok(None)
        }
        fn list_events_by_kind<'a>(&'a self, _kind: u32) -> BoxStream<'a, Result<crate::types::Event, StoreError>> {
            Box::pin(futures::stream::empty())
        }
        async fn load_service_state(&self, _service_name: &str) -> Result<Option<serde_json::Value>, StoreError> {
            Ok(None)
        }
        async fn save_service_state(&self, _service_name: &str, _state: &serde_json::Value, _updated_at: i64) -> Result<(), StoreError> {
            Ok(())
        }
        async fn delete_orphan_events(&self) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn delete_orphan_nip11(&self) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn delete_orphan_nip66(&self) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    fn relay(url: &str) -> Relay {
        Relay {
            url: url.to_string(),
            network: Network::Clearnet,
            inserted_at: 0,
        }
    }

    #[tokio::test]
    async fn one_iteration_processes_every_relay_in_the_working_set() {
        let processed = Arc::new(AtomicU64::new(0));
        let kind = Arc::new(CountingService {
            relays: (0..25).map(|i| relay(&format!("wss://relay{i}.example.com"))).collect(),
            processed: Arc::clone(&processed),
        });
        let store: Arc<dyn Store> = Arc::new(NoopStore);
        let shutdown = crate::shutdown::Shutdown::new();

        let config = SchedulerConfig {
            worker_count: 3,
            worker_concurrency: 4,
            channel_capacity: 30,
            task_deadline: Duration::from_secs(1),
            loop_interval: Duration::from_secs(60),
        };

        let stats = run_iteration(kind, store, &config, shutdown.watch()).await;
        assert_eq!(stats.relays_processed, 25);
        assert_eq!(stats.relays_failed, 0);
        assert_eq!(processed.load(Ordering::SeqCst), 25);
    }

    struct SlowService;

    #[async_trait]
    impl ServiceKind for SlowService {
        fn name(&self) -> &str {
            "slow-service"
        }

        fn working_set<'a>(&'a self, _store: &'a dyn Store) -> BoxStream<'a, Result<Relay, StoreError>> {
            Box::pin(futures::stream::iter(vec![Ok(relay("wss://slow.example.com"))]))
        }

        async fn process_one(&self, _store: &dyn Store, _relay: &Relay) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn task_deadline_is_counted_as_a_failure() {
        let store: Arc<dyn Store> = Arc::new(NoopStore);
        let shutdown = crate::shutdown::Shutdown::new();
        let config = SchedulerConfig {
            worker_count: 1,
            worker_concurrency: 1,
            channel_capacity: 4,
            task_deadline: Duration::from_millis(50),
            loop_interval: Duration::from_secs(60),
        };

        let stats = run_iteration(Arc::new(SlowService), store, &config, shutdown.watch()).await;
        assert_eq!(stats.relays_failed, 1);
        assert_eq!(stats.relays_processed, 0);
    }
}
