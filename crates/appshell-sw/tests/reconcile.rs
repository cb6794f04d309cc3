//! Activation-time reconciliation across worker versions.

mod common;

use std::sync::Arc;

use appshell_cache::{CacheStorage, CachedResponse, MemoryCacheStorage};
use appshell_sw::{
    ActivationOutcome, CacheScope, ErrorKind, Manifest, ReconcileMode, ReconcileReport,
    ServiceWorker, WorkerState,
};
use common::{activated, body_for, config, snapshot, url, FakeFetcher, FaultyStorage};

const V1: &[(&str, &str)] = &[
    ("/", "r1"),
    ("main.dart.js", "m1"),
    ("assets/logo.png", "l1"),
    ("assets/font.ttf", "f1"),
];
const CORE: &[&str] = &["/", "main.dart.js"];

fn reconciled(outcome: Option<ActivationOutcome>) -> ReconcileReport {
    match outcome {
        Some(ActivationOutcome::Reconciled(report)) => report,
        other => panic!("expected a reconciled activation, got {other:?}"),
    }
}

/// Install v1 and fill the content store completely.
async fn v1_fully_cached(storage: &MemoryCacheStorage, fetcher: &Arc<FakeFetcher>) {
    fetcher.serve_manifest(V1);
    let scope = CacheScope::new(Arc::new(storage.clone()));
    let worker = activated(config(V1, CORE), scope, fetcher.clone()).await;
    worker.populate_offline().await.unwrap();
}

async fn install_version(
    entries: &[(&str, &str)],
    storage: &MemoryCacheStorage,
    fetcher: &Arc<FakeFetcher>,
) -> ReconcileReport {
    let worker = ServiceWorker::new(
        config(entries, CORE).with_version("next"),
        CacheScope::new(Arc::new(storage.clone())),
        fetcher.clone(),
    )
    .unwrap();
    reconciled(worker.install().await.unwrap().activation)
}

#[tokio::test]
async fn test_unchanged_manifest_is_idempotent() {
    let storage = MemoryCacheStorage::new();
    let fetcher = FakeFetcher::new();
    v1_fully_cached(&storage, &fetcher).await;
    let before = snapshot(&storage, "app-cache").await;
    fetcher.reset_calls();

    let report = install_version(V1, &storage, &fetcher).await;

    assert_eq!(report.mode, ReconcileMode::Upgrade);
    assert!(report.evicted.is_empty());
    assert_eq!(report.retained, 4);
    assert_eq!(snapshot(&storage, "app-cache").await, before);
    // Only the core list is staged again; retained resources are not refetched.
    let mut calls = fetcher.calls();
    calls.sort();
    assert_eq!(calls, vec![url("/").to_string(), url("main.dart.js").to_string()]);
}

#[tokio::test]
async fn test_changed_hash_evicts_entry() {
    let storage = MemoryCacheStorage::new();
    let fetcher = FakeFetcher::new();
    v1_fully_cached(&storage, &fetcher).await;

    let v2 = &[
        ("/", "r1"),
        ("main.dart.js", "m1"),
        ("assets/logo.png", "l2"),
        ("assets/font.ttf", "f1"),
    ];
    fetcher.serve_manifest(v2);
    let report = install_version(v2, &storage, &fetcher).await;

    assert_eq!(report.evicted, vec![url("assets/logo.png").to_string()]);
    let content = snapshot(&storage, "app-cache").await;
    assert!(!content.contains_key(url("assets/logo.png").as_str()));
    assert_eq!(
        content[url("assets/font.ttf").as_str()],
        body_for("assets/font.ttf", "f1")
    );
}

#[tokio::test]
async fn test_changed_core_hash_is_restaged() {
    let storage = MemoryCacheStorage::new();
    let fetcher = FakeFetcher::new();
    v1_fully_cached(&storage, &fetcher).await;

    let v2 = &[
        ("/", "r1"),
        ("main.dart.js", "m2"),
        ("assets/logo.png", "l1"),
        ("assets/font.ttf", "f1"),
    ];
    fetcher.serve_manifest(v2);
    install_version(v2, &storage, &fetcher).await;

    let content = snapshot(&storage, "app-cache").await;
    assert_eq!(
        content[url("main.dart.js").as_str()],
        body_for("main.dart.js", "m2")
    );
}

#[tokio::test]
async fn test_orphaned_entries_are_removed() {
    let storage = MemoryCacheStorage::new();
    let fetcher = FakeFetcher::new();
    v1_fully_cached(&storage, &fetcher).await;

    let v2 = &[("/", "r1"), ("main.dart.js", "m1"), ("assets/logo.png", "l1")];
    let report = install_version(v2, &storage, &fetcher).await;

    assert_eq!(report.evicted, vec![url("assets/font.ttf").to_string()]);
    let content = snapshot(&storage, "app-cache").await;
    assert_eq!(content.len(), 3);
    assert!(!content.contains_key(url("assets/font.ttf").as_str()));
}

#[tokio::test]
async fn test_staged_core_overwrites_retained_entry() {
    let storage = MemoryCacheStorage::new();
    let fetcher = FakeFetcher::new();
    v1_fully_cached(&storage, &fetcher).await;

    // Same hash, different bytes on the server: the staged copy still wins.
    fetcher.serve(&url("/"), 200, "rebuilt index");
    install_version(V1, &storage, &fetcher).await;

    let content = snapshot(&storage, "app-cache").await;
    assert_eq!(content[url("/").as_str()], "rebuilt index");
}

#[tokio::test]
async fn test_first_install_keeps_only_core() {
    let storage = MemoryCacheStorage::new();
    let fetcher = FakeFetcher::new();
    fetcher.serve_manifest(V1);

    let leftovers = storage.open("app-cache").await.unwrap();
    leftovers
        .put(
            url("old-main.js").as_str(),
            CachedResponse::new(url("old-main.js").as_str(), 200, "old"),
        )
        .await
        .unwrap();
    leftovers
        .put(
            url("assets/logo.png").as_str(),
            CachedResponse::new(url("assets/logo.png").as_str(), 200, "unknown vintage"),
        )
        .await
        .unwrap();

    let report = install_version(V1, &storage, &fetcher).await;

    assert_eq!(report.mode, ReconcileMode::FirstInstall);
    assert_eq!(report.staged, 2);
    let mut keys: Vec<_> = snapshot(&storage, "app-cache").await.into_keys().collect();
    keys.sort();
    assert_eq!(keys, vec![url("/").to_string(), url("main.dart.js").to_string()]);
    assert!(!storage.has("app-temp-cache").await.unwrap());
}

#[tokio::test]
async fn test_applied_manifest_is_persisted() {
    let storage = MemoryCacheStorage::new();
    let fetcher = FakeFetcher::new();
    fetcher.serve_manifest(V1);
    install_version(V1, &storage, &fetcher).await;

    let store = storage.open("app-manifest").await.unwrap();
    let keys = store.keys().await.unwrap();
    assert_eq!(keys, vec![url("manifest").to_string()]);

    let saved = store.match_url(url("manifest").as_str()).await.unwrap().unwrap();
    let manifest = Manifest::from_json(&saved.body).unwrap();
    assert_eq!(manifest, common::manifest(V1));
}

#[tokio::test]
async fn test_failed_activation_resets_every_store() {
    let memory = MemoryCacheStorage::new();
    let fetcher = FakeFetcher::new();
    v1_fully_cached(&memory, &fetcher).await;

    let storage = FaultyStorage::new(memory.clone());
    let worker = ServiceWorker::new(
        config(V1, CORE).with_skip_waiting(false),
        CacheScope::new(Arc::new(storage.clone())),
        fetcher.clone(),
    )
    .unwrap();
    worker.install().await.unwrap();
    let client = worker.add_client(url("/")).await.unwrap();

    storage.fail_opening("app-manifest");
    let outcome = worker.skip_waiting().await.unwrap();

    match outcome {
        Some(ActivationOutcome::Reset { error }) => assert_eq!(error.kind(), ErrorKind::Storage),
        other => panic!("expected a reset, got {other:?}"),
    }
    assert_eq!(worker.state().await, WorkerState::Active);
    assert!(!worker.controls(client).await);
    for name in ["app-cache", "app-temp-cache", "app-manifest"] {
        assert!(!memory.has(name).await.unwrap(), "{name} should be gone");
    }

    // The next activation starts from scratch.
    let report = install_version(V1, &memory, &fetcher).await;
    assert_eq!(report.mode, ReconcileMode::FirstInstall);
}

#[tokio::test]
async fn test_corrupt_saved_manifest_resets() {
    let storage = MemoryCacheStorage::new();
    let fetcher = FakeFetcher::new();
    v1_fully_cached(&storage, &fetcher).await;

    let store = storage.open("app-manifest").await.unwrap();
    store
        .put(
            url("manifest").as_str(),
            CachedResponse::new(url("manifest").as_str(), 200, "{not json"),
        )
        .await
        .unwrap();

    let scope = CacheScope::new(Arc::new(storage.clone()));
    let worker = ServiceWorker::new(config(V1, CORE), scope, fetcher.clone()).unwrap();
    let outcome = worker.install().await.unwrap().activation.unwrap();

    match outcome {
        ActivationOutcome::Reset { error } => assert_eq!(error.kind(), ErrorKind::Manifest),
        other => panic!("expected a reset, got {other:?}"),
    }
    assert!(storage.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upgrade_survives_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::new();
    fetcher.serve_manifest(V1);

    {
        let storage = appshell_cache::DiskCacheStorage::new(dir.path()).await.unwrap();
        let scope = CacheScope::new(Arc::new(storage));
        let worker = activated(config(V1, CORE), scope, fetcher.clone()).await;
        worker.populate_offline().await.unwrap();
    }

    let v2 = &[("/", "r1"), ("main.dart.js", "m1"), ("assets/logo.png", "l2")];
    fetcher.serve_manifest(v2);
    let storage = appshell_cache::DiskCacheStorage::new(dir.path()).await.unwrap();
    let scope = CacheScope::new(Arc::new(storage));
    let worker = ServiceWorker::new(config(v2, CORE), scope, fetcher.clone()).unwrap();
    let report = reconciled(worker.install().await.unwrap().activation);

    assert_eq!(report.mode, ReconcileMode::Upgrade);
    let mut evicted = report.evicted.clone();
    evicted.sort();
    assert_eq!(
        evicted,
        vec![
            url("assets/font.ttf").to_string(),
            url("assets/logo.png").to_string()
        ]
    );
    assert_eq!(report.retained, 2);
}
