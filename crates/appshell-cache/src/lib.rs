//! # AppShell Cache
//!
//! Named request/response stores, modelled on the browser Cache API.
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage (caches)
//!     ├── open(name) ──→ Cache
//!     ├── delete(name)
//!     └── keys()
//!
//! Cache
//!     └── request URL → CachedResponse
//! ```
//!
//! Two backends are provided: [`MemoryCacheStorage`] for tests and embedding,
//! and [`DiskCacheStorage`] which keeps one JSON document per named store so
//! state survives process restarts.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod disk;
pub mod memory;

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

// ==================== Errors ====================

/// Errors raised by a cache backend.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache '{0}' was deleted while a handle to it was still in use")]
    Deleted(String),

    #[error("Invalid cache name: {0}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// ==================== Payload ====================

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// URL the response was produced for.
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CachedResponse {
    /// Create a response stamped with the current time.
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: HashMap::new(),
            body: body.into(),
            cached_at: now_millis(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Whether the status is in the 2xx range.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

// ==================== Traits ====================

/// A single named store mapping request URLs to responses.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Store name.
    fn name(&self) -> &str;

    /// Look up the response stored for exactly this URL.
    async fn match_url(&self, url: &str) -> CacheResult<Option<CachedResponse>>;

    /// Store a response, replacing any previous entry for the URL.
    async fn put(&self, url: &str, response: CachedResponse) -> CacheResult<()>;

    /// Store a batch of responses. Either every entry is stored or none is.
    async fn put_all(&self, entries: Vec<(String, CachedResponse)>) -> CacheResult<()>;

    /// Delete an entry. Returns whether it existed.
    async fn delete(&self, url: &str) -> CacheResult<bool>;

    /// All stored URLs, sorted.
    async fn keys(&self) -> CacheResult<Vec<String>>;
}

/// The set of named stores for one origin.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a store, creating it if it does not exist.
    async fn open(&self, name: &str) -> CacheResult<Arc<dyn Cache>>;

    /// Check whether a store exists.
    async fn has(&self, name: &str) -> CacheResult<bool>;

    /// Delete a store and every entry in it. Returns whether it existed.
    ///
    /// Handles obtained earlier from [`CacheStorage::open`] fail with
    /// [`CacheError::Deleted`] afterwards.
    async fn delete(&self, name: &str) -> CacheResult<bool>;

    /// Names of all existing stores, sorted.
    async fn keys(&self) -> CacheResult<Vec<String>>;
}

/// Reject names that cannot be used as a file stem.
pub(crate) fn validate_name(name: &str) -> CacheResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_response_ok() {
        assert!(CachedResponse::new("https://app.test/a.js", 200, "x").ok());
        assert!(CachedResponse::new("https://app.test/a.js", 204, "").ok());
        assert!(!CachedResponse::new("https://app.test/a.js", 404, "").ok());
    }

    #[test]
    fn test_header_names_are_lowercased() {
        let response = CachedResponse::new("https://app.test/", 200, "")
            .with_header("Content-Type", "text/html");
        assert_eq!(
            response.headers.get("content-type").map(String::as_str),
            Some("text/html")
        );
    }

    #[test]
    fn test_body_serializes_as_base64() {
        let response = CachedResponse::new("https://app.test/icon.png", 200, vec![0u8, 159, 146, 150]);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["body"], "AJ+Slg==");

        let decoded: CachedResponse = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.body, response.body);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("app-cache").is_ok());
        assert!(validate_name("app_temp.v2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../escape").is_err());
        assert!(validate_name(".hidden").is_err());
    }
}
