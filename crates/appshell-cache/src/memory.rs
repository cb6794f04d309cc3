//! In-memory cache storage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::trace;

use crate::{validate_name, Cache, CacheError, CacheResult, CacheStorage, CachedResponse};

/// A named store held entirely in memory.
#[derive(Debug)]
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<String, CachedResponse>>,
    deleted: AtomicBool,
}

impl MemoryCache {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
            deleted: AtomicBool::new(false),
        }
    }

    fn ensure_live(&self) -> CacheResult<()> {
        if self.deleted.load(Ordering::Acquire) {
            return Err(CacheError::Deleted(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_url(&self, url: &str) -> CacheResult<Option<CachedResponse>> {
        self.ensure_live()?;
        Ok(self.entries.read().await.get(url).cloned())
    }

    async fn put(&self, url: &str, response: CachedResponse) -> CacheResult<()> {
        self.ensure_live()?;
        trace!(cache = %self.name, url, "put");
        self.entries.write().await.insert(url.to_string(), response);
        Ok(())
    }

    async fn put_all(&self, entries: Vec<(String, CachedResponse)>) -> CacheResult<()> {
        self.ensure_live()?;
        let mut stored = self.entries.write().await;
        for (url, response) in entries {
            stored.insert(url, response);
        }
        Ok(())
    }

    async fn delete(&self, url: &str) -> CacheResult<bool> {
        self.ensure_live()?;
        Ok(self.entries.write().await.remove(url).is_some())
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        self.ensure_live()?;
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Cache storage held in memory. Cloning shares the underlying stores.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStorage {
    caches: Arc<RwLock<HashMap<String, Arc<MemoryCache>>>>,
}

impl MemoryCacheStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> CacheResult<Arc<dyn Cache>> {
        validate_name(name)?;
        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCache::new(name)));
        Ok(Arc::clone(cache) as Arc<dyn Cache>)
    }

    async fn has(&self, name: &str) -> CacheResult<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> CacheResult<bool> {
        match self.caches.write().await.remove(name) {
            Some(cache) => {
                cache.deleted.store(true, Ordering::Release);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
