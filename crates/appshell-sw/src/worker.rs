//! One worker version: configuration, stores, network and lifecycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use appshell_net::{Fetcher, Request};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::{ClientId, Clients};
use crate::config::WorkerConfig;
use crate::error::{SwError, SwResult};
use crate::generation::{CacheScope, Generation};
use crate::install::Installer;
use crate::lifecycle::{ControlMessage, Lifecycle, WorkerState};
use crate::populate::{OfflinePopulator, PopulateReport};
use crate::reconcile::{ActivationOutcome, Reconciler};
use crate::router::{FetchOutcome, PassThrough, RequestRouter};

/// Unique identifier for a worker version instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Result of [`ServiceWorker::install`].
#[derive(Debug)]
pub struct InstallReport {
    /// Core assets written to the temp store.
    pub staged: usize,
    /// Present when install went straight on to activation.
    pub activation: Option<ActivationOutcome>,
}

/// Result of a control message.
#[derive(Debug)]
pub enum MessageOutcome {
    /// `skipWaiting`: the activation it triggered, if the worker was waiting.
    SkipWaiting(Option<ActivationOutcome>),
    /// `downloadOffline` finished.
    Populated(PopulateReport),
    /// Unrecognized message.
    Ignored,
}

/// Point-in-time view of a worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub id: ServiceWorkerId,
    pub version: String,
    pub state: WorkerState,
    pub generation: u64,
    /// Milliseconds spent in the current state.
    pub state_age_ms: u64,
    pub manifest_entries: usize,
    /// Manifest keys with a content-store entry.
    pub cached_entries: usize,
    pub controlled_clients: usize,
}

/// A cache worker version.
///
/// Every handler is an `async fn`; the returned future is the completion
/// handle the host keeps alive until the handler finishes.
pub struct ServiceWorker {
    id: ServiceWorkerId,
    config: Arc<WorkerConfig>,
    scope: CacheScope,
    fetcher: Arc<dyn Fetcher>,
    lifecycle: RwLock<Lifecycle>,
    clients: RwLock<Clients>,
    skip_waiting_requested: AtomicBool,
}

impl ServiceWorker {
    /// Build a worker version from a validated configuration.
    ///
    /// Versions that share stores must share the `scope` too, so that a
    /// newer version's reconciliation fences out an older one.
    pub fn new(config: WorkerConfig, scope: CacheScope, fetcher: Arc<dyn Fetcher>) -> SwResult<Self> {
        config.validate()?;
        let skip = config.skip_waiting_on_install;
        Ok(Self {
            id: ServiceWorkerId::new(),
            config: Arc::new(config),
            scope,
            fetcher,
            lifecycle: RwLock::new(Lifecycle::new()),
            clients: RwLock::new(Clients::new()),
            skip_waiting_requested: AtomicBool::new(skip),
        })
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub async fn state(&self) -> WorkerState {
        self.lifecycle.read().await.state()
    }

    async fn transition(&self, next: WorkerState) -> SwResult<()> {
        self.lifecycle.write().await.transition(next)
    }

    /// A later version has reconciled the stores this one serves from.
    fn superseded_in(&self, generation: Generation) -> bool {
        generation.owner().is_some_and(|owner| owner != self.id)
    }

    async fn ensure_current(&self) -> SwResult<()> {
        let generation = self.scope.generation().current().await;
        if self.superseded_in(generation) {
            return Err(SwError::State(format!(
                "version {} was superseded at generation {}",
                self.config.version,
                generation.number()
            )));
        }
        Ok(())
    }

    // ==================== Install ====================

    /// Stage core assets into the temp store.
    ///
    /// On failure the version becomes redundant. On success it waits, or
    /// activates right away when skip-waiting was requested.
    pub async fn install(&self) -> SwResult<InstallReport> {
        self.transition(WorkerState::Installing).await?;

        let staged = match Installer::new(&self.config, self.scope.storage(), self.fetcher.as_ref())
            .stage()
            .await
        {
            Ok(staged) => staged,
            Err(e) => {
                warn!(version = %self.config.version, error = %e, "Install failed");
                self.transition(WorkerState::Redundant).await?;
                return Err(e);
            }
        };
        self.transition(WorkerState::Waiting).await?;

        let activation = if self.skip_waiting_requested.load(Ordering::Acquire) {
            Some(self.activate().await?)
        } else {
            None
        };
        Ok(InstallReport { staged, activation })
    }

    /// Activate without waiting for controlled clients to close.
    ///
    /// While installing, the request is remembered and honoured once
    /// install completes. In any other state it is a no-op.
    pub async fn skip_waiting(&self) -> SwResult<Option<ActivationOutcome>> {
        match self.state().await {
            WorkerState::Waiting => Ok(Some(self.activate().await?)),
            WorkerState::Parsed | WorkerState::Installing => {
                self.skip_waiting_requested.store(true, Ordering::Release);
                Ok(None)
            }
            state => {
                debug!(%state, "skipWaiting ignored");
                Ok(None)
            }
        }
    }

    // ==================== Activate ====================

    /// Reconcile the stores and start serving.
    ///
    /// Reconciliation failures reset every store and still leave the worker
    /// active with an empty cache; only an illegal state is an error.
    pub async fn activate(&self) -> SwResult<ActivationOutcome> {
        // Taken before the state flips so no fetch routed while activating
        // can observe the stores mid-migration.
        let outcome = {
            let mut generation = self.scope.generation().write().await;
            self.transition(WorkerState::Activating).await?;
            let outcome = Reconciler::new(&self.config, self.scope.storage())
                .run()
                .await;
            generation.advance(self.id);
            outcome
        };

        if outcome.is_reconciled() {
            let claimed = self.clients.write().await.claim(self.id);
            debug!(claimed, "Clients claimed");
        }
        self.transition(WorkerState::Active).await?;
        info!(version = %self.config.version, id = self.id.raw(), "Worker active");
        Ok(outcome)
    }

    // ==================== Fetch ====================

    /// Handle an intercepted request.
    ///
    /// An active version that finds a later version owning the stores
    /// retires itself and stops answering.
    pub async fn handle_fetch(&self, request: &Request) -> SwResult<FetchOutcome> {
        if !self.state().await.handles_fetches() {
            return Ok(FetchOutcome::PassThrough(PassThrough::NotControlling));
        }
        // Waits out a reconciliation in progress.
        let pinned = self.scope.generation().current().await;
        if self.superseded_in(pinned) {
            self.retire_superseded(pinned).await?;
            return Ok(FetchOutcome::PassThrough(PassThrough::NotControlling));
        }
        self.router().route_in(request, pinned).await
    }

    async fn retire_superseded(&self, generation: Generation) -> SwResult<()> {
        let mut lifecycle = self.lifecycle.write().await;
        if lifecycle.state() == WorkerState::Active {
            lifecycle.transition(WorkerState::Redundant)?;
            info!(
                version = %self.config.version,
                generation = generation.number(),
                "Superseded by a newer version"
            );
        }
        Ok(())
    }

    fn router(&self) -> RequestRouter<'_> {
        RequestRouter::new(&self.config, &self.scope, self.fetcher.as_ref())
    }

    // ==================== Messages ====================

    /// Handle a raw control message.
    pub async fn handle_message(&self, raw: &str) -> SwResult<MessageOutcome> {
        match ControlMessage::parse(raw) {
            Some(ControlMessage::SkipWaiting) => {
                Ok(MessageOutcome::SkipWaiting(self.skip_waiting().await?))
            }
            Some(ControlMessage::DownloadOffline) => {
                Ok(MessageOutcome::Populated(self.populate_offline().await?))
            }
            None => {
                debug!(message = raw, "Ignoring unrecognized message");
                Ok(MessageOutcome::Ignored)
            }
        }
    }

    /// Fetch every manifest resource missing from the content store.
    pub async fn populate_offline(&self) -> SwResult<PopulateReport> {
        self.ensure_current().await?;
        OfflinePopulator::new(&self.config, &self.scope, self.fetcher.as_ref())
            .populate()
            .await
    }

    // ==================== Clients ====================

    /// Register a page of this origin. It stays uncontrolled until the next
    /// successful activation claims it.
    pub async fn add_client(&self, url: Url) -> SwResult<ClientId> {
        if url.origin() != self.config.origin.origin() {
            return Err(SwError::State(format!(
                "client {url} is outside origin {}",
                self.config.origin
            )));
        }
        Ok(self.clients.write().await.add(url))
    }

    /// Whether this worker controls the client.
    pub async fn controls(&self, client: ClientId) -> bool {
        self.clients
            .read()
            .await
            .get(client)
            .is_some_and(|c| c.controller == Some(self.id))
    }

    /// Retire this version; it stops handling fetches.
    pub async fn retire(&self) -> SwResult<()> {
        self.transition(WorkerState::Redundant).await
    }

    // ==================== Status ====================

    /// Snapshot of lifecycle state and cache coverage.
    pub async fn status(&self) -> SwResult<WorkerStatus> {
        let missing = OfflinePopulator::new(&self.config, &self.scope, self.fetcher.as_ref())
            .missing()
            .await?;
        let (state, state_age_ms) = {
            let lifecycle = self.lifecycle.read().await;
            let age = lifecycle.changed_at().elapsed().as_millis();
            (lifecycle.state(), u64::try_from(age).unwrap_or(u64::MAX))
        };

        Ok(WorkerStatus {
            id: self.id,
            version: self.config.version.clone(),
            state,
            state_age_ms,
            generation: self.scope.generation().current().await.number(),
            manifest_entries: self.config.manifest.len(),
            cached_entries: self.config.manifest.len() - missing.len(),
            controlled_clients: self.clients.read().await.controlled_by(self.id),
        })
    }
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("version", &self.config.version)
            .field("origin", &self.config.origin.as_str())
            .finish_non_exhaustive()
    }
}
