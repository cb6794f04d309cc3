//! # AppShell Service Worker
//!
//! Manifest-driven offline cache for a web application shell.
//!
//! ## Features
//!
//! - **Install**: stage the core asset list into a temp store
//! - **Activate**: diff the previous manifest against the new one, keep
//!   unchanged resources, evict changed or orphaned ones, then promote the
//!   staged core assets
//! - **Fetch**: online-first for the root document, cache-first with lazy
//!   fill for every other manifest resource, pass-through for the rest
//! - **Offline population**: top up the content store on demand
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorker (one version)
//!     ├── WorkerConfig ── Manifest (ResourceKey → ContentHash), core list
//!     ├── Lifecycle    ── parsed → installing → waiting → activating → active
//!     │                                                        └──→ redundant
//!     ├── Installer        ──→ temp store
//!     ├── Reconciler       ──→ content store, manifest store
//!     ├── RequestRouter    ──→ content store ⇄ Fetcher
//!     ├── OfflinePopulator ──→ content store ⇄ Fetcher
//!     └── CacheScope       (stores + GenerationLock shared by every version)
//! ```

mod bulk;
pub mod clients;
pub mod config;
pub mod error;
pub mod generation;
pub mod install;
pub mod key;
pub mod lifecycle;
pub mod manifest;
pub mod populate;
pub mod reconcile;
pub mod router;
pub mod worker;

pub use clients::{Client, ClientId, Clients};
pub use config::{CacheNames, WorkerConfig};
pub use error::{ErrorKind, SwError, SwResult};
pub use generation::{CacheScope, Generation, GenerationLock};
pub use install::Installer;
pub use key::{ContentHash, ResourceKey};
pub use lifecycle::{ControlMessage, Lifecycle, WorkerState};
pub use manifest::Manifest;
pub use populate::{OfflinePopulator, PopulateReport};
pub use reconcile::{ActivationOutcome, ReconcileMode, ReconcileReport, Reconciler};
pub use router::{FetchOutcome, PassThrough, RequestRouter};
pub use worker::{InstallReport, MessageOutcome, ServiceWorker, ServiceWorkerId, WorkerStatus};
