#![allow(dead_code)]

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use contentproxy::cache::{
    CacheConfig, CacheStore, Content, ContentCache, ContentLoader, InvalidationResult,
    LoaderError, MemoryStore, NodeKey, NoopObserver, Observer,
};
use tokio::sync::Semaphore;

/// Scripted content source. Unknown ids render as `<p>{id}</p>`.
#[derive(Default)]
pub struct StubLoader {
    responses: Mutex<HashMap<String, Result<Content, LoaderError>>>,
    calls: Mutex<Vec<NodeKey>>,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
}

impl StubLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every call consumes one permit before answering.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn render(&self, id: &str, html: &str, dependencies: &[&str]) {
        self.respond(
            id,
            Ok(Content {
                html: html.to_string(),
                dependencies: dependencies.iter().map(|dep| dep.to_string()).collect(),
                valid_until: 0,
            }),
        );
    }

    pub fn respond(&self, id: &str, response: Result<Content, LoaderError>) {
        self.responses
            .lock()
            .expect("responses lock")
            .insert(id.to_string(), response);
    }

    pub fn calls_for(&self, id: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|key| key.id == id)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl ContentLoader for StubLoader {
    async fn get_content(
        &self,
        node: &NodeKey,
        _deadline: Duration,
    ) -> Result<Content, LoaderError> {
        self.calls.lock().expect("calls lock").push(node.clone());

        if let Some(gate) = self.gate.as_ref() {
            gate.acquire()
                .await
                .map_err(|err| LoaderError::Response(err.to_string()))?
                .forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self
            .responses
            .lock()
            .expect("responses lock")
            .get(&node.id)
            .cloned();
        scripted.unwrap_or_else(|| {
            Ok(Content {
                html: format!("<p>{}</p>", node.id),
                dependencies: Vec::new(),
                valid_until: 0,
            })
        })
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub seen: Mutex<Vec<InvalidationResult>>,
}

impl RecordingObserver {
    pub fn ids(&self) -> Vec<String> {
        self.seen
            .lock()
            .expect("observer lock")
            .iter()
            .map(|result| result.item.id.clone())
            .collect()
    }
}

impl Observer for RecordingObserver {
    fn notify(&self, result: InvalidationResult) {
        self.seen.lock().expect("observer lock").push(result);
    }
}

/// Engine settings scaled down so retry paths run in milliseconds.
pub fn fast_config() -> CacheConfig {
    CacheConfig {
        workers: 4,
        retry_tick_ms: 20,
        retry_grace_secs: 0,
        load_timeout_ms: 1_000,
        slow_load_timeout_ms: 1_000,
        ..CacheConfig::default()
    }
}

pub async fn start(
    config: CacheConfig,
    loader: Arc<StubLoader>,
) -> (ContentCache, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let cache = start_with(config, store.clone(), loader, Arc::new(NoopObserver)).await;
    (cache, store)
}

pub async fn start_with(
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    loader: Arc<StubLoader>,
    observer: Arc<dyn Observer>,
) -> ContentCache {
    ContentCache::start(config, store, loader, observer)
        .await
        .expect("engine starts")
}

pub fn key(id: &str) -> NodeKey {
    NodeKey::new(id, "de", "live")
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
