//! The caching and invalidation engine.

use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use futures::FutureExt;
use metrics::histogram;
use time::OffsetDateTime;
use tokio::{
    sync::{
        Mutex,
        mpsc::{self, error::TrySendError},
    },
    task::JoinHandle,
    time::{Instant, timeout},
};
use tracing::{debug, info, instrument, warn};

use super::config::CacheConfig;
use super::deps::DependencyGraph;
use super::error::CacheError;
use super::flight::LoadGroup;
use super::item::{CacheItem, NodeKey, valid_until};
use super::loader::{ContentLoader, LoaderError};
use super::observer::{InvalidationResult, Observer};
use super::request::InvalidationRequest;
use super::retry::{self, RetryLane, RetryPolicy};
use super::stats::{METRIC_LOAD_MS, Outcome, PipelineCounters, PipelineStats};
use super::store::CacheStore;

/// Where an invalidation request ended up when it was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// The queue was full; the request waits in the retry lane instead.
    Diverted,
    /// The engine is shutting down.
    Closed,
}

/// Content cache fronting a [`ContentLoader`].
///
/// `get` reads the store, `load` recomputes synchronously with per-key
/// coalescing, and `invalidate` queues a background refresh that never blocks.
/// Each successful refresh records the item's dependencies and re-queues every
/// node that depends on it.
pub struct ContentCache {
    core: Arc<Core>,
    tasks: Vec<JoinHandle<()>>,
}

struct Core {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    loader: Arc<dyn ContentLoader>,
    observer: Arc<dyn Observer>,
    graph: DependencyGraph,
    flights: LoadGroup,
    queue: mpsc::Sender<InvalidationRequest>,
    retry: RetryLane,
    counters: Arc<PipelineCounters>,
    /// Hashes with a stale-read refresh still in the pipeline.
    stale_refreshes: DashMap<String, ()>,
}

impl ContentCache {
    /// Rebuild the dependency graph from the store, then start the worker pool
    /// and retry lane. Returns once the graph is complete.
    pub async fn start(
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
        loader: Arc<dyn ContentLoader>,
        observer: Arc<dyn Observer>,
    ) -> Result<Self, CacheError> {
        let items = store.get_all().await?;
        let graph = DependencyGraph::from_items(&items);
        info!(
            backend = store.backend(),
            items = items.len(),
            edges = graph.edge_count(),
            "Dependency graph rebuilt from store"
        );
        drop(items);

        let counters = Arc::new(PipelineCounters::default());
        let (queue, jobs) = mpsc::channel(config.queue_capacity());
        let (retry, retry_task) =
            retry::spawn(queue.clone(), RetryPolicy::from(&config), Arc::clone(&counters));

        let workers = config.workers;
        let core = Arc::new(Core {
            config,
            store,
            loader,
            observer,
            graph,
            flights: LoadGroup::new(),
            queue,
            retry,
            counters,
            stale_refreshes: DashMap::new(),
        });

        let jobs = Arc::new(Mutex::new(jobs));
        let mut tasks = Vec::with_capacity(workers + 1);
        tasks.push(retry_task);
        for worker in 0..workers {
            tasks.push(tokio::spawn(run_worker(
                Arc::clone(&core),
                Arc::clone(&jobs),
                worker,
            )));
        }

        info!(
            workers,
            queue_capacity = core.config.queue_capacity(),
            "Invalidation pipeline started"
        );
        Ok(Self { core, tasks })
    }

    /// Read the stored item without side effects.
    pub async fn get(&self, key: &NodeKey) -> Result<CacheItem, CacheError> {
        Ok(self.core.store.get(&key.hash()).await?)
    }

    /// Recompute `key` now. Concurrent calls for the same key share one load.
    pub async fn load(&self, key: &NodeKey) -> Result<CacheItem, CacheError> {
        let core = Arc::clone(&self.core);
        let request = InvalidationRequest::new(key.clone());
        self.core
            .flights
            .run(&key.hash(), move || {
                async move { core.refresh(&request).await }.boxed()
            })
            .await
    }

    /// Serve from the store, loading on a miss.
    ///
    /// Expired items are still returned, with a background refresh queued.
    /// At most one such refresh per key is in the pipeline at a time.
    pub async fn fetch(&self, key: &NodeKey) -> Result<CacheItem, CacheError> {
        match self.get(key).await {
            Ok(item) => {
                if item.is_expired_at(OffsetDateTime::now_utc()) {
                    self.refresh_stale(key);
                }
                Ok(item)
            }
            Err(err) if err.is_not_found() => self.load(key).await,
            Err(err) => Err(err),
        }
    }

    fn refresh_stale(&self, key: &NodeKey) {
        let hash = key.hash();
        if self.core.stale_refreshes.insert(hash.clone(), ()).is_some() {
            return;
        }
        debug!(node = %key, "Serving expired item while refreshing");
        if self.invalidate(key.clone()) == Submission::Closed {
            self.core.stale_refreshes.remove(&hash);
        }
    }

    /// Queue a background refresh of `key`. Never blocks.
    pub fn invalidate(&self, key: NodeKey) -> Submission {
        self.core.submit(InvalidationRequest::new(key))
    }

    /// Queue a refresh of every stored item.
    pub async fn invalidate_all(&self) -> Result<usize, CacheError> {
        let items = self.core.store.get_all().await?;
        let submitted = items.len();
        for item in items {
            self.invalidate(item.key());
        }
        info!(submitted, "Full cache invalidation queued");
        Ok(submitted)
    }

    pub async fn remove_all(&self) -> Result<(), CacheError> {
        self.core.store.remove_all().await?;
        info!(backend = self.core.store.backend(), "Cache store cleared");
        Ok(())
    }

    pub async fn count(&self) -> Result<usize, CacheError> {
        Ok(self.core.store.count().await?)
    }

    pub async fn get_all(&self) -> Result<Vec<CacheItem>, CacheError> {
        Ok(self.core.store.get_all().await?)
    }

    pub async fn get_etag(&self, key: &NodeKey) -> Result<String, CacheError> {
        self.get_etag_by_hash(&key.hash()).await
    }

    pub async fn get_etag_by_hash(&self, hash: &str) -> Result<String, CacheError> {
        Ok(self.core.store.get_etag(hash).await?)
    }

    pub async fn get_all_etags(&self, workspace: &str) -> Result<HashMap<String, String>, CacheError> {
        Ok(self.core.store.get_all_etags(workspace).await?)
    }

    /// Nodes recorded as depending on `key`.
    pub fn dependents(&self, key: &NodeKey) -> Vec<String> {
        self.core.graph.get(&key.id, &key.dimension, &key.workspace)
    }

    pub fn backend(&self) -> &'static str {
        self.core.store.backend()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.core.config
    }

    pub fn stats(&self) -> PipelineStats {
        let queue = &self.core.queue;
        let capacity = queue.max_capacity();
        self.core.counters.snapshot(
            capacity - queue.capacity(),
            capacity,
            self.core.config.workers,
        )
    }

    /// Stop the worker pool and retry lane. Queued work is discarded.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for ContentCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Core {
    fn submit(&self, request: InvalidationRequest) -> Submission {
        match self.queue.try_send(request) {
            Ok(()) => Submission::Queued,
            Err(TrySendError::Full(request)) => {
                warn!(
                    request_id = %request.id,
                    node = %request.key,
                    outcome = Outcome::Diverted.as_str(),
                    "Invalidation queue full, diverting to retry lane"
                );
                self.counters.record(Outcome::Diverted);
                self.retry.push(request);
                Submission::Diverted
            }
            Err(TrySendError::Closed(request)) => {
                warn!(
                    request_id = %request.id,
                    node = %request.key,
                    "Invalidation queue closed, request dropped"
                );
                Submission::Closed
            }
        }
    }

    /// Load, persist, record dependencies, fan out to dependents and notify.
    #[instrument(
        skip(self, request),
        fields(node = %request.key, attempt = request.execution_counter)
    )]
    async fn refresh(&self, request: &InvalidationRequest) -> Result<CacheItem, CacheError> {
        let started = Instant::now();
        let deadline = self.config.load_timeout(request.execution_counter);

        let content = match timeout(deadline, self.loader.get_content(&request.key, deadline)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(LoaderError::Timeout(deadline).into()),
        };

        let expiry = valid_until(
            content.valid_until,
            self.config.lifetime(),
            OffsetDateTime::now_utc(),
        );
        let item = CacheItem::new(&request.key, content.html, content.dependencies, expiry);
        self.store.upsert(&item).await?;

        for dependency in &item.dependencies {
            self.graph
                .set(&item.id, dependency, &item.dimension, &item.workspace);
        }

        let mut cascaded = 0;
        for dependent in self.graph.get(&item.id, &item.dimension, &item.workspace) {
            if let Some(next) = request.cascade(&dependent) {
                self.submit(next);
                cascaded += 1;
            }
        }

        let duration = started.elapsed();
        histogram!(METRIC_LOAD_MS).record(duration.as_secs_f64() * 1000.0);
        info!(
            request_id = %request.id,
            hash = %item.hash,
            etag = %item.etag,
            dependencies = item.dependencies.len(),
            cascaded,
            depth = request.depth(),
            elapsed_ms = duration.as_millis() as u64,
            "Cache item refreshed"
        );

        self.observer.notify(InvalidationResult {
            item: item.clone(),
            duration,
        });
        Ok(item)
    }

    async fn execute(&self, mut request: InvalidationRequest) {
        let err = match self.refresh(&request).await {
            Ok(_) => {
                self.counters.record(Outcome::Completed);
                self.stale_refreshes.remove(&request.key.hash());
                return;
            }
            Err(err) => err,
        };

        if err.is_permanent() || request.execution_counter >= self.config.max_attempts {
            warn!(
                request_id = %request.id,
                node = %request.key,
                attempts = request.execution_counter,
                error_kind = err.kind(),
                error = %err,
                outcome = Outcome::Abandoned.as_str(),
                "Abandoning invalidation"
            );
            self.counters.record(Outcome::Abandoned);
            self.stale_refreshes.remove(&request.key.hash());
            return;
        }

        request.mark_failed(Instant::now());
        warn!(
            request_id = %request.id,
            node = %request.key,
            attempts = request.execution_counter,
            error_kind = err.kind(),
            error = %err,
            outcome = Outcome::Retried.as_str(),
            "Invalidation failed, scheduling retry"
        );
        self.counters.record(Outcome::Retried);
        self.retry.push(request);
    }
}

async fn run_worker(
    core: Arc<Core>,
    jobs: Arc<Mutex<mpsc::Receiver<InvalidationRequest>>>,
    worker: usize,
) {
    loop {
        let next = jobs.lock().await.recv().await;
        let Some(request) = next else {
            break;
        };
        debug!(worker, request_id = %request.id, node = %request.key, "Executing invalidation");
        core.execute(request).await;
    }
    debug!(worker, "Invalidation worker stopped");
}
