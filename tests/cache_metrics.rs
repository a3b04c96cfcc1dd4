mod common;

use std::{collections::HashSet, sync::Arc, time::Duration};

use contentproxy::cache::{
    CacheConfig, CacheStore, FilesystemStore, LoaderError, fingerprint,
};
use futures::future::join_all;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

use common::{StubLoader, eventually, fast_config, key, start};

#[tokio::test]
async fn pipeline_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let loader = Arc::new(StubLoader::new().with_delay(Duration::from_millis(50)));
    loader.respond("flaky", Err(LoaderError::Response("boom".into())));
    let config = CacheConfig {
        max_attempts: 1,
        ..fast_config()
    };
    let (cache, _store) = start(config, Arc::clone(&loader)).await;
    let cache = Arc::new(cache);

    // Coalesced loads + load latency
    let loads = (0..4).map(|_| {
        let cache = Arc::clone(&cache);
        async move { cache.load(&key("hot")).await }
    });
    for result in join_all(loads).await {
        result.expect("load succeeds");
    }

    // Completed, retried and abandoned outcomes + retry lane gauge
    cache.invalidate(key("hot"));
    cache.invalidate(key("flaky"));
    eventually("outcomes", || async {
        let stats = cache.stats();
        stats.completed == 1 && stats.abandoned == 1
    })
    .await;

    // Corrupt record on disk
    let dir = tempfile::tempdir().expect("tempdir");
    let hash = key("broken").hash();
    tokio::fs::write(
        dir.path().join(format!("{}.json", fingerprint(&hash))),
        b"{ not json",
    )
    .await
    .expect("write corrupt record");
    let disk = FilesystemStore::open(dir.path()).await.expect("open store");
    assert!(disk.get(&hash).await.expect_err("corrupt").is_not_found());

    let snapshot = snapshotter.snapshot().into_vec();
    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "contentproxy_invalidations_total",
        "contentproxy_retry_pending",
        "contentproxy_load_ms",
        "contentproxy_flight_joins_total",
        "contentproxy_store_corrupt_total",
    ];
    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }

    let outcomes: HashSet<String> = snapshot
        .iter()
        .filter(|(composite_key, _, _, _)| {
            composite_key.key().name() == "contentproxy_invalidations_total"
        })
        .filter(|(_, _, _, value)| matches!(value, DebugValue::Counter(count) if *count > 0))
        .flat_map(|(composite_key, _, _, _)| {
            composite_key
                .key()
                .labels()
                .filter(|label| label.key() == "outcome")
                .map(|label| label.value().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    for outcome in ["completed", "retry_scheduled", "abandoned"] {
        assert!(outcomes.contains(outcome), "missing outcome: {outcome}");
    }
}
