//! Shared fixtures for worker integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use appshell_cache::{
    Cache, CacheError, CacheResult, CacheStorage, CachedResponse, MemoryCacheStorage,
};
use appshell_net::{Fetcher, NetError, Request, Response};
use appshell_sw::{CacheScope, Manifest, ResourceKey, ServiceWorker, WorkerConfig};
use async_trait::async_trait;
use http::StatusCode;
use tokio::sync::Notify;
use url::Url;

pub const ORIGIN: &str = "https://app.test";

pub fn url(path: &str) -> Url {
    Url::parse(&format!("{ORIGIN}/{}", path.trim_start_matches('/'))).unwrap()
}

pub fn get(path: &str) -> Request {
    Request::get(url(path))
}

pub fn manifest(entries: &[(&str, &str)]) -> Manifest {
    entries.iter().copied().collect()
}

pub fn config(entries: &[(&str, &str)], core: &[&str]) -> WorkerConfig {
    WorkerConfig::new(
        Url::parse(ORIGIN).unwrap(),
        manifest(entries),
        core.iter().map(|k| ResourceKey::from(*k)).collect(),
    )
}

/// Body the fake network serves for a key at a given hash.
pub fn body_for(key: &str, hash: &str) -> String {
    format!("{key}@{hash}")
}

/// One-shot checkpoint: once armed, the next task to pass it parks until
/// the test releases it.
#[derive(Clone, Default)]
pub struct Gate {
    armed: Arc<AtomicBool>,
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl Gate {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub async fn pass(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.release.notified().await;
        }
    }

    /// Wait until a task is parked at the gate.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Scripted network that records every request it sees.
#[derive(Default)]
pub struct FakeFetcher {
    routes: Mutex<HashMap<String, (u16, String)>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
    /// Passed after a request is recorded, before it is answered.
    pub gate: Gate,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &Url, status: u16, body: impl Into<String>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, body.into()));
    }

    /// Serve every manifest key at its canonical address.
    pub fn serve_manifest(&self, entries: &[(&str, &str)]) {
        for (key, hash) in entries {
            let slot = ResourceKey::from(*key)
                .slot_url(&Url::parse(ORIGIN).unwrap())
                .unwrap();
            self.serve(&slot, 200, body_for(key, hash));
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        self.calls.lock().unwrap().push(request.url.to_string());
        self.gate.pass().await;

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetError::RequestFailed("network unreachable".to_string()));
        }

        let mut lookup = request.url.clone();
        lookup.set_fragment(None);
        let routed = {
            let routes = self.routes.lock().unwrap();
            routes.get(lookup.as_str()).cloned().or_else(|| {
                lookup.set_query(None);
                routes.get(lookup.as_str()).cloned()
            })
        };
        let (status, body) = routed.unwrap_or((404, String::new()));
        Ok(Response::new(
            request.url.clone(),
            StatusCode::from_u16(status).unwrap(),
            body,
        ))
    }
}

/// Memory storage that can be told to fail opening one store, or to park
/// right after deleting an entry.
#[derive(Clone, Default)]
pub struct FaultyStorage {
    inner: MemoryCacheStorage,
    fail_open: Arc<Mutex<Option<String>>>,
    pub delete_gate: Gate,
}

impl FaultyStorage {
    pub fn new(inner: MemoryCacheStorage) -> Self {
        Self {
            inner,
            fail_open: Arc::default(),
            delete_gate: Gate::default(),
        }
    }

    pub fn fail_opening(&self, name: &str) {
        *self.fail_open.lock().unwrap() = Some(name.to_string());
    }
}

#[async_trait]
impl CacheStorage for FaultyStorage {
    async fn open(&self, name: &str) -> CacheResult<Arc<dyn Cache>> {
        if self.fail_open.lock().unwrap().as_deref() == Some(name) {
            return Err(CacheError::Backend(format!("quota exceeded opening {name}")));
        }
        let inner = self.inner.open(name).await?;
        Ok(Arc::new(GatedCache {
            inner,
            gate: self.delete_gate.clone(),
        }))
    }

    async fn has(&self, name: &str) -> CacheResult<bool> {
        self.inner.has(name).await
    }

    async fn delete(&self, name: &str) -> CacheResult<bool> {
        self.inner.delete(name).await
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        self.inner.keys().await
    }
}

struct GatedCache {
    inner: Arc<dyn Cache>,
    gate: Gate,
}

#[async_trait]
impl Cache for GatedCache {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn match_url(&self, url: &str) -> CacheResult<Option<CachedResponse>> {
        self.inner.match_url(url).await
    }

    async fn put(&self, url: &str, response: CachedResponse) -> CacheResult<()> {
        self.inner.put(url, response).await
    }

    async fn put_all(&self, entries: Vec<(String, CachedResponse)>) -> CacheResult<()> {
        self.inner.put_all(entries).await
    }

    async fn delete(&self, url: &str) -> CacheResult<bool> {
        let deleted = self.inner.delete(url).await?;
        self.gate.pass().await;
        Ok(deleted)
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        self.inner.keys().await
    }
}

/// Content-store entries as `url → body`.
pub async fn snapshot(storage: &dyn CacheStorage, store: &str) -> HashMap<String, String> {
    let cache = storage.open(store).await.unwrap();
    let mut entries = HashMap::new();
    for key in cache.keys().await.unwrap() {
        let entry = cache.match_url(&key).await.unwrap().unwrap();
        entries.insert(key, String::from_utf8(entry.body.to_vec()).unwrap());
    }
    entries
}

/// Build, install and activate a worker version.
pub async fn activated(
    config: WorkerConfig,
    scope: CacheScope,
    fetcher: Arc<FakeFetcher>,
) -> ServiceWorker {
    let worker = ServiceWorker::new(config, scope, fetcher).unwrap();
    let report = worker.install().await.unwrap();
    assert!(report.activation.is_some(), "install should activate immediately");
    worker
}
