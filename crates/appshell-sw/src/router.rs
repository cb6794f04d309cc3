//! Fetch interception policy.
//!
//! Same-origin GET requests whose normalized key is listed in the manifest
//! are answered by the worker; everything else is left to the browser.
//! The root document is served online-first, every other resource
//! cache-first with lazy fill.
//!
//! A response is only written back if the stores are still in the
//! generation the request started in. Otherwise a reconciliation ran in
//! between and the entry may no longer belong in the content store.

use appshell_net::{Fetcher, Request, Response};
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::WorkerConfig;
use crate::error::{SwError, SwResult};
use crate::generation::{CacheScope, Generation};
use crate::key::ResourceKey;

/// Why a request was left to default browser handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassThrough {
    /// Not a GET request.
    NotGet,
    /// Address outside the worker's origin.
    CrossOrigin,
    /// Key not listed in the manifest.
    NotInManifest,
    /// The worker does not control clients in its current state.
    NotControlling,
}

/// What the worker did with an intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Default browser handling applies.
    PassThrough(PassThrough),
    /// The worker produced this response.
    Respond(Response),
}

impl FetchOutcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::PassThrough(_) => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            FetchOutcome::Respond(response) => Some(response),
            FetchOutcome::PassThrough(_) => None,
        }
    }
}

/// Routes intercepted requests against the content store.
pub struct RequestRouter<'a> {
    config: &'a WorkerConfig,
    scope: &'a CacheScope,
    fetcher: &'a dyn Fetcher,
}

impl<'a> RequestRouter<'a> {
    pub fn new(config: &'a WorkerConfig, scope: &'a CacheScope, fetcher: &'a dyn Fetcher) -> Self {
        Self {
            config,
            scope,
            fetcher,
        }
    }

    /// Decide whether the request is intercepted, and under which key.
    pub fn classify(&self, request: &Request) -> Result<ResourceKey, PassThrough> {
        if !request.is_get() {
            return Err(PassThrough::NotGet);
        }
        let key = ResourceKey::from_url(&request.url, &self.config.origin.origin())
            .ok_or(PassThrough::CrossOrigin)?;
        if !self.config.manifest.contains(&key) {
            return Err(PassThrough::NotInManifest);
        }
        Ok(key)
    }

    /// Handle one request in the current generation.
    pub async fn route(&self, request: &Request) -> SwResult<FetchOutcome> {
        let pinned = self.scope.generation().current().await;
        self.route_in(request, pinned).await
    }

    /// Handle one request that started in generation `pinned`.
    pub async fn route_in(&self, request: &Request, pinned: Generation) -> SwResult<FetchOutcome> {
        let key = match self.classify(request) {
            Ok(key) => key,
            Err(reason) => {
                trace!(url = %request.url, ?reason, "Passing through");
                return Ok(FetchOutcome::PassThrough(reason));
            }
        };
        let slot = key
            .slot_url(&self.config.origin)
            .map_err(|e| SwError::Config(format!("cannot resolve '{key}': {e}")))?;

        let response = if key.is_root() {
            self.online_first(request, &slot, pinned).await?
        } else {
            self.cache_first(request, &key, &slot, pinned).await?
        };
        Ok(FetchOutcome::Respond(response))
    }

    /// Live fetch, refreshing the stored copy; stored copy only when the
    /// network fails.
    async fn online_first(
        &self,
        request: &Request,
        slot: &Url,
        pinned: Generation,
    ) -> SwResult<Response> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                self.store(slot, &response, pinned).await;
                Ok(response)
            }
            Err(fetch_error) => {
                debug!(url = %request.url, error = %fetch_error, "Root fetch failed, trying cache");
                match self.lookup(slot).await {
                    Ok(Some(cached)) => Ok(cached),
                    Ok(None) => Err(SwError::Network(fetch_error)),
                    Err(store_error) => {
                        warn!(url = %slot, error = %store_error, "Cache fallback failed");
                        Err(SwError::Network(fetch_error))
                    }
                }
            }
        }
    }

    /// Stored copy if present; otherwise live fetch, storing OK responses.
    async fn cache_first(
        &self,
        request: &Request,
        key: &ResourceKey,
        slot: &Url,
        pinned: Generation,
    ) -> SwResult<Response> {
        if let Some(cached) = self.lookup(slot).await? {
            trace!(key = %key, "Cache hit");
            return Ok(cached);
        }

        debug!(key = %key, "Cache miss, fetching");
        let response = self.fetcher.fetch(request).await?;
        if response.ok() {
            self.store(slot, &response, pinned).await;
        }
        Ok(response)
    }

    async fn lookup(&self, slot: &Url) -> SwResult<Option<Response>> {
        let _generation = self.scope.generation().read().await;
        let content = self.scope.storage().open(&self.config.caches.content).await?;
        match content.match_url(slot.as_str()).await? {
            Some(entry) => Ok(Some(Response::from_cached(&entry)?)),
            None => Ok(None),
        }
    }

    /// Store a copy of `response` unless the stores moved past `pinned`.
    /// Failures are logged; the live response is returned to the page
    /// regardless.
    async fn store(&self, slot: &Url, response: &Response, pinned: Generation) {
        let generation = self.scope.generation().read().await;
        if *generation != pinned {
            debug!(
                url = %slot,
                started = pinned.number(),
                current = generation.number(),
                "Stores reconciled during fetch, not storing"
            );
            return;
        }
        let result = async {
            let content = self.scope.storage().open(&self.config.caches.content).await?;
            content
                .put(slot.as_str(), response.to_cached(slot.as_str()))
                .await?;
            Ok::<_, SwError>(())
        }
        .await;
        if let Err(e) = result {
            warn!(url = %slot, error = %e, "Failed to store response");
        }
    }
}

