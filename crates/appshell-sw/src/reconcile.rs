//! Activation-time reconciliation of the stores against the manifest.
//!
//! ```text
//! manifest store ──(old manifest?)──┬── none ──→ drop + recreate content
//!                                   └── some ──→ evict changed / orphaned
//! temp store ──────────────────────────────────→ copy into content (wins)
//! new manifest ────────────────────────────────→ manifest store
//! ```
//!
//! Any failure deletes all three stores so the next activation starts from
//! the first-install path.

use appshell_cache::{Cache, CacheStorage, CachedResponse};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{SwError, SwResult};
use crate::key::ResourceKey;
use crate::manifest::Manifest;

/// Which reconciliation path was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// No previous manifest: the content store was rebuilt from scratch.
    FirstInstall,
    /// A previous manifest was found and diffed.
    Upgrade,
}

/// Summary of a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub mode: ReconcileMode,
    /// Content entries deleted because their key vanished or its hash changed.
    pub evicted: Vec<String>,
    /// Content entries kept from the previous version.
    pub retained: usize,
    /// Entries copied from the temp store.
    pub staged: usize,
}

/// Result of an activation. Activation itself never fails: errors reset
/// the stores instead.
#[derive(Debug)]
pub enum ActivationOutcome {
    Reconciled(ReconcileReport),
    Reset { error: SwError },
}

impl ActivationOutcome {
    pub fn is_reconciled(&self) -> bool {
        matches!(self, ActivationOutcome::Reconciled(_))
    }
}

/// Reconciles the stores of one worker version.
pub struct Reconciler<'a> {
    config: &'a WorkerConfig,
    storage: &'a dyn CacheStorage,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a WorkerConfig, storage: &'a dyn CacheStorage) -> Self {
        Self { config, storage }
    }

    /// Run the activation protocol, resetting every store on failure.
    pub async fn run(&self) -> ActivationOutcome {
        match self.reconcile().await {
            Ok(report) => {
                info!(
                    version = %self.config.version,
                    mode = ?report.mode,
                    evicted = report.evicted.len(),
                    retained = report.retained,
                    staged = report.staged,
                    "Cache reconciled"
                );
                ActivationOutcome::Reconciled(report)
            }
            Err(error) => {
                error!(version = %self.config.version, %error, "Failed to upgrade cache worker");
                self.reset().await;
                ActivationOutcome::Reset { error }
            }
        }
    }

    async fn reconcile(&self) -> SwResult<ReconcileReport> {
        let names = &self.config.caches;
        let mut content = self.storage.open(&names.content).await?;
        let temp = self.storage.open(&names.temp).await?;
        let manifest_store = self.storage.open(&names.manifest).await?;

        let entry_url = self.config.manifest_entry_url()?;
        let previous = match manifest_store.match_url(&entry_url).await? {
            Some(saved) => Some(Manifest::from_json(&saved.body)?),
            None => None,
        };

        let (mode, evicted, retained) = match previous {
            None => {
                debug!("No previous manifest, rebuilding content store");
                self.storage.delete(&names.content).await?;
                content = self.storage.open(&names.content).await?;
                (ReconcileMode::FirstInstall, Vec::new(), 0)
            }
            Some(old) => {
                let (evicted, retained) = self.evict_stale(content.as_ref(), &old).await?;
                (ReconcileMode::Upgrade, evicted, retained)
            }
        };

        let staged = copy_entries(temp.as_ref(), content.as_ref()).await?;
        self.storage.delete(&names.temp).await?;

        let body = self.config.manifest.to_json()?;
        manifest_store
            .put(
                &entry_url,
                CachedResponse::new(entry_url.as_str(), 200, body)
                    .with_header("content-type", "application/json"),
            )
            .await?;

        Ok(ReconcileReport {
            mode,
            evicted,
            retained,
            staged,
        })
    }

    /// Delete content entries whose key left the manifest or whose hash
    /// changed. Returns the evicted URLs and the number of survivors.
    async fn evict_stale(
        &self,
        content: &dyn Cache,
        old: &Manifest,
    ) -> SwResult<(Vec<String>, usize)> {
        let origin = self.config.origin.origin();
        let mut evicted = Vec::new();
        let mut retained = 0;

        for url in content.keys().await? {
            let keep = ResourceKey::from_stored_url(&url, &origin)
                .is_some_and(|key| self.config.manifest.is_unchanged_since(old, &key));
            if keep {
                retained += 1;
            } else {
                debug!(url = %url, "Evicting stale entry");
                content.delete(&url).await?;
                evicted.push(url);
            }
        }
        Ok((evicted, retained))
    }

    /// Delete every store this worker owns. Individual failures are logged
    /// and do not stop the remaining deletions.
    pub async fn reset(&self) {
        for name in self.config.caches.all() {
            if let Err(e) = self.storage.delete(name).await {
                warn!(store = name, error = %e, "Failed to delete store during reset");
            }
        }
    }
}

/// Copy every entry of `from` into `to`, overwriting existing entries.
async fn copy_entries(from: &dyn Cache, to: &dyn Cache) -> SwResult<usize> {
    let mut copied = 0;
    for url in from.keys().await? {
        match from.match_url(&url).await? {
            Some(response) => {
                to.put(&url, response).await?;
                copied += 1;
            }
            None => warn!(url = %url, store = from.name(), "Listed entry vanished before copy"),
        }
    }
    Ok(copied)
}
