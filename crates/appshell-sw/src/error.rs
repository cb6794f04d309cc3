//! Error types for the cache worker.

use appshell_cache::CacheError;
use appshell_common::AppShellError;
use appshell_net::NetError;
use thiserror::Error;

/// Result alias for worker operations.
pub type SwResult<T> = Result<T, SwError>;

/// Coarse error classification used by the activation failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Store open/read/write failure.
    Storage,
    /// Network fetch failure, including non-OK statuses during bulk fetches.
    Network,
    /// Manifest decoding or validation failure.
    Manifest,
    /// Operation issued in a state that does not allow it.
    Lifecycle,
    /// Invalid worker configuration.
    Config,
}

/// Errors raised by the cache worker.
#[derive(Error, Debug)]
pub enum SwError {
    #[error("Storage error: {0}")]
    Storage(#[from] CacheError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Unexpected status {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Invalid state: {0}")]
    State(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl SwError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwError::Storage(_) => ErrorKind::Storage,
            SwError::Network(_) | SwError::BadStatus { .. } => ErrorKind::Network,
            SwError::Manifest(_) => ErrorKind::Manifest,
            SwError::State(_) => ErrorKind::Lifecycle,
            SwError::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<serde_json::Error> for SwError {
    fn from(e: serde_json::Error) -> Self {
        SwError::Manifest(e.to_string())
    }
}

impl From<SwError> for AppShellError {
    fn from(e: SwError) -> Self {
        match e {
            SwError::Storage(source) => {
                AppShellError::storage_with_source("cache store operation failed", source)
            }
            SwError::Network(source) => {
                AppShellError::network_with_source("fetch failed", source)
            }
            SwError::BadStatus { url, status } => {
                AppShellError::network(format!("unexpected status {status} for {url}"))
            }
            SwError::Manifest(message) => AppShellError::manifest(message),
            SwError::State(message) => AppShellError::Lifecycle(message),
            SwError::Config(message) => AppShellError::config(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            SwError::Storage(CacheError::Deleted("app-cache".into())).kind(),
            ErrorKind::Storage
        );
        assert_eq!(
            SwError::BadStatus {
                url: "https://app.test/a.js".into(),
                status: 500
            }
            .kind(),
            ErrorKind::Network
        );
        assert_eq!(SwError::Manifest("eof".into()).kind(), ErrorKind::Manifest);
    }

    #[test]
    fn test_json_errors_are_manifest_errors() {
        let err: SwError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Manifest);
    }

    #[test]
    fn test_conversion_to_common_error() {
        let common: AppShellError = SwError::Manifest("truncated".into()).into();
        assert_eq!(common.category(), "manifest");

        let timeout = NetError::Timeout(std::time::Duration::from_secs(30));
        let common: AppShellError = SwError::Network(timeout).into();
        assert_eq!(common.category(), "network");

        let common: AppShellError = SwError::State("not waiting".into()).into();
        assert_eq!(common.category(), "lifecycle");
    }
}
