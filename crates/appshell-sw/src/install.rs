//! Install staging: fetch the core asset list into the temp store.

use appshell_cache::CacheStorage;
use appshell_net::{CacheMode, Fetcher};
use tracing::info;

use crate::bulk::fetch_all;
use crate::config::WorkerConfig;
use crate::error::SwResult;

/// Stages core assets for a new worker version.
pub struct Installer<'a> {
    config: &'a WorkerConfig,
    storage: &'a dyn CacheStorage,
    fetcher: &'a dyn Fetcher,
}

impl<'a> Installer<'a> {
    pub fn new(
        config: &'a WorkerConfig,
        storage: &'a dyn CacheStorage,
        fetcher: &'a dyn Fetcher,
    ) -> Self {
        Self {
            config,
            storage,
            fetcher,
        }
    }

    /// Fetch every core asset, bypassing HTTP caches, and store the batch
    /// in the temp store. Returns the number of staged entries.
    pub async fn stage(&self) -> SwResult<usize> {
        let temp = self.storage.open(&self.config.caches.temp).await?;
        let entries = fetch_all(
            self.fetcher,
            &self.config.origin,
            &self.config.core,
            CacheMode::Reload,
        )
        .await?;

        let staged = entries.len();
        temp.put_all(entries).await?;
        info!(version = %self.config.version, staged, "Core assets staged");
        Ok(staged)
    }
}
