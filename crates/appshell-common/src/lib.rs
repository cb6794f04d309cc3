//! # AppShell Common
//!
//! Shared error type and logging configuration for the AppShell cache worker.
//!
//! ## Features
//!
//! - Unified error type, classified for log fields
//! - Logging configuration and setup

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for AppShell.
#[derive(Error, Debug)]
pub enum AppShellError {
    /// Blob store open/read/write failures.
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Network fetch failures.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Manifest decoding or validation failures.
    #[error("Manifest error: {message}")]
    Manifest { message: String },

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Lifecycle errors (an operation issued in the wrong worker state).
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl AppShellError {
    /// Create a storage error with source.
    pub fn storage_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a manifest error.
    pub fn manifest(message: impl Into<String>) -> Self {
        Self::Manifest {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            AppShellError::Storage { .. } => "storage",
            AppShellError::Network { .. } => "network",
            AppShellError::Manifest { .. } => "manifest",
            AppShellError::Config { .. } => "config",
            AppShellError::Lifecycle(_) => "lifecycle",
            AppShellError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

/// Result type alias for AppShell operations.
pub type Result<T> = std::result::Result<T, AppShellError>;
