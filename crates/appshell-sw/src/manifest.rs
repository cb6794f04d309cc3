//! The asset manifest: resource key → content hash.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{SwError, SwResult};
use crate::key::{ContentHash, ResourceKey};

/// Immutable mapping from resource key to content hash.
///
/// Serializes as a flat JSON object, the same shape the build emits:
/// `{"main.dart.js": "f89a...", "/": "aa0e..."}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<ResourceKey, ContentHash>,
}

impl Manifest {
    /// Decode a manifest from JSON bytes.
    pub fn from_json(raw: &[u8]) -> SwResult<Self> {
        let manifest: Manifest = serde_json::from_slice(raw)?;
        Ok(manifest)
    }

    /// Encode as JSON.
    pub fn to_json(&self) -> SwResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Hash recorded for `key`.
    pub fn get(&self, key: &ResourceKey) -> Option<&ContentHash> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.entries.contains_key(key)
    }

    /// All keys, in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKey, &ContentHash)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a cached copy of `key` made under `previous` is still valid
    /// under this manifest: the key is still listed and its hash is unchanged.
    pub fn is_unchanged_since(&self, previous: &Manifest, key: &ResourceKey) -> bool {
        match (self.get(key), previous.get(key)) {
            (Some(current), Some(old)) => current == old,
            _ => false,
        }
    }

    /// Check that every key of `core` is listed.
    pub fn validate_core(&self, core: &[ResourceKey]) -> SwResult<()> {
        match core.iter().find(|key| !self.contains(key)) {
            Some(missing) => Err(SwError::Config(format!(
                "core asset '{missing}' is not listed in the manifest"
            ))),
            None => Ok(()),
        }
    }
}

impl<K: Into<ResourceKey>, H: Into<ContentHash>> FromIterator<(K, H)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (K, H)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, h)| (k.into(), h.into()))
                .collect(),
        }
    }
}
