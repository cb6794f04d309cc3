//! Generation coordination between activation and request handling.
//!
//! Reconciliation holds the write side for its whole run; request handlers
//! and the offline populator hold the read side around each group of
//! content-store operations. A handler therefore observes the store either
//! before or after a reconciliation, never halfway through one.
//!
//! The lock belongs to the stores, not to a worker version: every version
//! built over the same [`CacheScope`] is ordered by the same lock.

use std::fmt;
use std::sync::Arc;

use appshell_cache::CacheStorage;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::worker::ServiceWorkerId;

/// Reconciliations completed over a set of stores, and the version that
/// ran the latest one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Generation {
    number: u64,
    owner: Option<ServiceWorkerId>,
}

impl Generation {
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Version whose activation produced the current store contents.
    pub fn owner(&self) -> Option<ServiceWorkerId> {
        self.owner
    }

    /// Move to the next generation, owned by `owner`.
    pub fn advance(&mut self, owner: ServiceWorkerId) {
        self.number += 1;
        self.owner = Some(owner);
    }
}

/// Readers–writer lock over the current generation.
#[derive(Debug, Default)]
pub struct GenerationLock {
    inner: RwLock<Generation>,
}

impl GenerationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared access for request handling.
    pub async fn read(&self) -> RwLockReadGuard<'_, Generation> {
        self.inner.read().await
    }

    /// Exclusive access for reconciliation.
    pub async fn write(&self) -> RwLockWriteGuard<'_, Generation> {
        self.inner.write().await
    }

    /// Snapshot of the current generation.
    pub async fn current(&self) -> Generation {
        *self.inner.read().await
    }
}

/// The stores of one origin together with the lock ordering access to them.
///
/// Clones share both. Worker versions that operate on the same stores must
/// be built from clones of one scope.
#[derive(Clone)]
pub struct CacheScope {
    storage: Arc<dyn CacheStorage>,
    generation: Arc<GenerationLock>,
}

impl CacheScope {
    pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
        Self {
            storage,
            generation: Arc::new(GenerationLock::new()),
        }
    }

    pub fn storage(&self) -> &dyn CacheStorage {
        self.storage.as_ref()
    }

    pub fn generation(&self) -> &GenerationLock {
        &self.generation
    }
}

impl fmt::Debug for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheScope")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
