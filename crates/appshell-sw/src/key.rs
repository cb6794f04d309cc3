//! Resource keys and content hashes.
//!
//! A [`ResourceKey`] is the origin-relative path of a manifest resource. The
//! root document is the sentinel `/`; every other key has no leading slash
//! (`main.dart.js`, `assets/NOTICES`).

use std::fmt;

use serde::{Deserialize, Serialize};
use url::{Origin, Url};

/// Query marker used by the hosting page to bust HTTP caches.
const VERSION_QUERY: &str = "?v=";

/// Normalized identifier for a cacheable resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// The root document sentinel.
    pub const ROOT: &'static str = "/";

    /// Wrap a manifest path. An empty path denotes the root document.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        if path.is_empty() {
            Self::root()
        } else {
            Self(path)
        }
    }

    /// The root document key.
    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    /// Whether this is the root document.
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the key for a request address.
    ///
    /// Returns `None` for cross-origin addresses. The origin prefix and any
    /// `?v=` suffix are stripped; the bare origin, `origin/#...` fragments
    /// and empty paths all collapse to the root sentinel.
    pub fn from_url(url: &Url, origin: &Origin) -> Option<Self> {
        if url.origin() != *origin {
            return None;
        }
        let href = url.as_str();
        let origin_prefix = origin.ascii_serialization();
        let rest = href.get(origin_prefix.len()..)?;

        let mut key = rest.strip_prefix('/').unwrap_or(rest);
        if let Some(idx) = key.find(VERSION_QUERY) {
            key = &key[..idx];
        }
        if rest.is_empty() || rest.starts_with("/#") || key.is_empty() {
            return Some(Self::root());
        }
        Some(Self(key.to_string()))
    }

    /// Parse a stored URL and derive its key. Unparseable or foreign URLs
    /// yield `None`.
    pub fn from_stored_url(url: &str, origin: &Origin) -> Option<Self> {
        let url = Url::parse(url).ok()?;
        Self::from_url(&url, origin)
    }

    /// The canonical cache slot for this key under `origin`.
    ///
    /// Every address that normalizes to this key shares the slot, so
    /// `main.dart.js?v=123` and `main.dart.js` hit the same entry.
    pub fn slot_url(&self, origin: &Url) -> Result<Url, url::ParseError> {
        if self.is_root() {
            origin.join("/")
        } else {
            origin.join(&format!("/{}", self.0))
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Opaque content digest. Equal hashes mean equal content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentHash {
    fn from(hash: &str) -> Self {
        Self::new(hash)
    }
}
