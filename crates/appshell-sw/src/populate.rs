//! Offline population: fetch every manifest resource the content store
//! does not hold yet.

use appshell_net::{CacheMode, Fetcher};
use hashbrown::HashSet;
use tracing::{debug, info};

use crate::bulk::fetch_all;
use crate::config::WorkerConfig;
use crate::error::{SwError, SwResult};
use crate::generation::CacheScope;
use crate::key::ResourceKey;

/// Result of one population run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulateReport {
    /// Keys that were missing and have now been stored.
    pub fetched: Vec<ResourceKey>,
    /// Keys already present before the run.
    pub already_cached: usize,
}

/// Fills the content store with every manifest resource.
pub struct OfflinePopulator<'a> {
    config: &'a WorkerConfig,
    scope: &'a CacheScope,
    fetcher: &'a dyn Fetcher,
}

impl<'a> OfflinePopulator<'a> {
    pub fn new(config: &'a WorkerConfig, scope: &'a CacheScope, fetcher: &'a dyn Fetcher) -> Self {
        Self {
            config,
            scope,
            fetcher,
        }
    }

    /// Manifest keys with no entry in the content store, in manifest order.
    pub async fn missing(&self) -> SwResult<Vec<ResourceKey>> {
        let _generation = self.scope.generation().read().await;
        let content = self.scope.storage().open(&self.config.caches.content).await?;
        let origin = self.config.origin.origin();
        let cached: HashSet<ResourceKey> = content
            .keys()
            .await?
            .iter()
            .filter_map(|url| ResourceKey::from_stored_url(url, &origin))
            .collect();

        Ok(self
            .config
            .manifest
            .keys()
            .filter(|key| !cached.contains(*key))
            .cloned()
            .collect())
    }

    /// Fetch and store every missing resource in a single all-or-nothing
    /// batch. No retries; a failed batch stores nothing, and so does a run
    /// overtaken by a reconciliation.
    pub async fn populate(&self) -> SwResult<PopulateReport> {
        let pinned = self.scope.generation().current().await;
        let missing = self.missing().await?;
        let already_cached = self.config.manifest.len() - missing.len();
        if missing.is_empty() {
            debug!("Content store already complete");
            return Ok(PopulateReport {
                fetched: missing,
                already_cached,
            });
        }

        let entries = fetch_all(
            self.fetcher,
            &self.config.origin,
            &missing,
            CacheMode::Default,
        )
        .await?;

        {
            let generation = self.scope.generation().read().await;
            if *generation != pinned {
                return Err(SwError::State(format!(
                    "stores were reconciled (generation {} → {}) while populating",
                    pinned.number(),
                    generation.number()
                )));
            }
            let content = self.scope.storage().open(&self.config.caches.content).await?;
            content.put_all(entries).await?;
        }

        info!(fetched = missing.len(), already_cached, "Offline population complete");
        Ok(PopulateReport {
            fetched: missing,
            already_cached,
        })
    }
}
