//! Worker configuration.
//!
//! A worker version is fully described by a [`WorkerConfig`]: the origin it
//! serves, the manifest and core asset list baked in at build time, and the
//! names of the stores it owns. The configuration is immutable once a
//! worker is built from it.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SwError, SwResult};
use crate::key::ResourceKey;
use crate::manifest::Manifest;

/// Names of the three stores a worker owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheNames {
    /// Long-lived content store serving fetches.
    pub content: String,
    /// Staging store filled during install.
    pub temp: String,
    /// Single-entry store holding the last applied manifest.
    pub manifest: String,
}

impl Default for CacheNames {
    fn default() -> Self {
        Self {
            content: "app-cache".to_string(),
            temp: "app-temp-cache".to_string(),
            manifest: "app-manifest".to_string(),
        }
    }
}

impl CacheNames {
    /// All store names, content first.
    pub fn all(&self) -> [&str; 3] {
        [&self.content, &self.temp, &self.manifest]
    }
}

/// Configuration of one worker version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Version label, used in logs and status output.
    #[serde(default = "default_version")]
    pub version: String,

    /// Origin whose same-origin requests are intercepted.
    pub origin: Url,

    /// Resource key → content hash.
    #[serde(rename = "resources")]
    pub manifest: Manifest,

    /// Keys fetched during install, in order.
    #[serde(default)]
    pub core: Vec<ResourceKey>,

    /// Store names.
    #[serde(default)]
    pub caches: CacheNames,

    /// Key of the single entry in the manifest store.
    #[serde(default = "default_manifest_entry_key")]
    pub manifest_entry_key: String,

    /// Activate immediately after install instead of waiting.
    #[serde(default = "default_true")]
    pub skip_waiting_on_install: bool,
}

fn default_version() -> String {
    "unversioned".to_string()
}

fn default_manifest_entry_key() -> String {
    "manifest".to_string()
}

fn default_true() -> bool {
    true
}

impl WorkerConfig {
    /// Build a configuration with default store names.
    pub fn new(origin: Url, manifest: Manifest, core: Vec<ResourceKey>) -> Self {
        Self {
            version: default_version(),
            origin,
            manifest,
            core,
            caches: CacheNames::default(),
            manifest_entry_key: default_manifest_entry_key(),
            skip_waiting_on_install: true,
        }
    }

    /// Set the version label.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Set whether install activates immediately.
    pub fn with_skip_waiting(mut self, skip: bool) -> Self {
        self.skip_waiting_on_install = skip;
        self
    }

    /// Decode a bundle document.
    pub fn from_json(raw: &[u8]) -> SwResult<Self> {
        let config: WorkerConfig = serde_json::from_slice(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a bundle document from disk.
    pub async fn load(path: impl AsRef<Path>) -> SwResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| SwError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    /// Check internal consistency.
    pub fn validate(&self) -> SwResult<()> {
        if !matches!(self.origin.scheme(), "http" | "https") || self.origin.host().is_none() {
            return Err(SwError::Config(format!(
                "origin must be an http(s) URL with a host, got '{}'",
                self.origin
            )));
        }
        if self.manifest_entry_key.is_empty() {
            return Err(SwError::Config("manifest entry key is empty".to_string()));
        }
        let names = self.caches.all();
        if names[0] == names[1] || names[0] == names[2] || names[1] == names[2] {
            return Err(SwError::Config(format!(
                "store names must be distinct, got {names:?}"
            )));
        }
        self.manifest.validate_core(&self.core)
    }

    /// URL under which the applied manifest is stored.
    pub fn manifest_entry_url(&self) -> SwResult<String> {
        self.origin
            .join(&self.manifest_entry_key)
            .map(String::from)
            .map_err(|e| SwError::Config(format!("bad manifest entry key: {e}")))
    }
}
