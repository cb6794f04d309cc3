//! Directory-backed cache storage.
//!
//! Each named store lives in `<root>/<name>.json`. Every mutation rewrites
//! the document through a temporary file and a rename, so a crash never
//! leaves a half-written store behind.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::{validate_name, Cache, CacheError, CacheResult, CacheStorage, CachedResponse};

const EXTENSION: &str = "json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCache {
    name: String,
    entries: HashMap<String, CachedResponse>,
}

/// A named store persisted as one JSON document.
#[derive(Debug)]
pub struct DiskCache {
    name: String,
    path: PathBuf,
    entries: Mutex<HashMap<String, CachedResponse>>,
    deleted: AtomicBool,
}

impl DiskCache {
    async fn load(name: &str, path: PathBuf) -> CacheResult<Self> {
        let entries = match fs::read(&path).await {
            Ok(raw) => {
                let stored: StoredCache = serde_json::from_slice(&raw)?;
                stored.entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                write_document(&path, name, &HashMap::new()).await?;
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        debug!(cache = name, entries = entries.len(), path = %path.display(), "Opened disk cache");

        Ok(Self {
            name: name.to_string(),
            path,
            entries: Mutex::new(entries),
            deleted: AtomicBool::new(false),
        })
    }

    fn ensure_live(&self) -> CacheResult<()> {
        if self.deleted.load(Ordering::Acquire) {
            return Err(CacheError::Deleted(self.name.clone()));
        }
        Ok(())
    }
}

async fn write_document(
    path: &Path,
    name: &str,
    entries: &HashMap<String, CachedResponse>,
) -> CacheResult<()> {
    let document = StoredCache {
        name: name.to_string(),
        entries: entries.clone(),
    };
    let raw = serde_json::to_vec(&document)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, raw).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl Cache for DiskCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_url(&self, url: &str) -> CacheResult<Option<CachedResponse>> {
        self.ensure_live()?;
        Ok(self.entries.lock().await.get(url).cloned())
    }

    async fn put(&self, url: &str, response: CachedResponse) -> CacheResult<()> {
        self.put_all(vec![(url.to_string(), response)]).await
    }

    async fn put_all(&self, batch: Vec<(String, CachedResponse)>) -> CacheResult<()> {
        self.ensure_live()?;
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        for (url, response) in batch {
            trace!(cache = %self.name, url = %url, "put");
            next.insert(url, response);
        }
        write_document(&self.path, &self.name, &next).await?;
        *entries = next;
        Ok(())
    }

    async fn delete(&self, url: &str) -> CacheResult<bool> {
        self.ensure_live()?;
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(url) {
            return Ok(false);
        }
        let mut next = entries.clone();
        next.remove(url);
        write_document(&self.path, &self.name, &next).await?;
        *entries = next;
        Ok(true)
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        self.ensure_live()?;
        let mut keys: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Cache storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
    open: Arc<Mutex<HashMap<String, Arc<DiskCache>>>>,
}

impl DiskCacheStorage {
    /// Use `root` as the storage directory, creating it if needed.
    pub async fn new(root: impl Into<PathBuf>) -> CacheResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            open: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Storage directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{EXTENSION}"))
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> CacheResult<Arc<dyn Cache>> {
        validate_name(name)?;
        let mut open = self.open.lock().await;
        if let Some(cache) = open.get(name) {
            return Ok(Arc::clone(cache) as Arc<dyn Cache>);
        }
        let cache = Arc::new(DiskCache::load(name, self.path_for(name)).await?);
        open.insert(name.to_string(), Arc::clone(&cache));
        Ok(cache as Arc<dyn Cache>)
    }

    async fn has(&self, name: &str) -> CacheResult<bool> {
        validate_name(name)?;
        if self.open.lock().await.contains_key(name) {
            return Ok(true);
        }
        Ok(fs::try_exists(self.path_for(name)).await?)
    }

    async fn delete(&self, name: &str) -> CacheResult<bool> {
        validate_name(name)?;
        let mut open = self.open.lock().await;
        let was_open = match open.remove(name) {
            Some(cache) => {
                cache.deleted.store(true, Ordering::Release);
                true
            }
            None => false,
        };
        let removed = match fs::remove_file(self.path_for(name)).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if removed || was_open {
            debug!(cache = name, "Deleted disk cache");
        }
        Ok(removed || was_open)
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
