//! All-or-nothing bulk fetch shared by install staging and offline population.

use appshell_cache::CachedResponse;
use appshell_net::{CacheMode, Fetcher, Request};
use futures::future::try_join_all;
use tracing::debug;
use url::Url;

use crate::error::{SwError, SwResult};
use crate::key::ResourceKey;

/// Fetch every key's canonical slot concurrently.
///
/// Fails on the first transport error or non-OK status; nothing is returned
/// for partial success, so callers store either every response or none.
pub(crate) async fn fetch_all(
    fetcher: &dyn Fetcher,
    origin: &Url,
    keys: &[ResourceKey],
    mode: CacheMode,
) -> SwResult<Vec<(String, CachedResponse)>> {
    let fetches = keys.iter().map(|key| async move {
        let slot = key
            .slot_url(origin)
            .map_err(|e| SwError::Config(format!("cannot resolve '{key}': {e}")))?;
        let request = Request::get(slot.clone()).cache_mode(mode);
        let response = fetcher.fetch(&request).await?;
        if !response.ok() {
            return Err(SwError::BadStatus {
                url: slot.to_string(),
                status: response.status.as_u16(),
            });
        }
        debug!(key = %key, status = %response.status, "Fetched");
        Ok::<_, SwError>((slot.to_string(), response.to_cached(slot.as_str())))
    });
    try_join_all(fetches).await
}
