//! `appshell`: drive an offline cache worker against a directory-backed store.
//!
//! Each invocation loads a worker bundle (version, origin, manifest, core
//! list) and operates on the stores kept under `--store`, so an `activate`
//! with a newer bundle upgrades whatever a previous run left behind.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use appshell_cache::DiskCacheStorage;
use appshell_common::logging::{init_logging, LogConfig, LogFormat};
use appshell_common::AppShellError;
use appshell_net::{LoaderConfig, Request, ResourceLoader};
use appshell_sw::{
    ActivationOutcome, CacheScope, ControlMessage, FetchOutcome, Manifest, MessageOutcome,
    OfflinePopulator, RequestRouter, ServiceWorker, SwError, WorkerConfig,
};
use clap::{ArgAction, Parser, Subcommand};
use http::Method;
use serde::Serialize;
use tracing::{debug, error, warn};

#[derive(Parser, Debug)]
#[command(name = "appshell", version, about = "Manifest-driven offline cache worker")]
struct Cli {
    /// Worker bundle: version, origin, resources and core list.
    #[arg(long, global = true, env = "APPSHELL_BUNDLE", default_value = "appshell.json")]
    bundle: PathBuf,

    /// Directory holding the persisted stores.
    #[arg(long, global = true, env = "APPSHELL_STORE")]
    store: Option<PathBuf>,

    /// Network timeout in seconds.
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Log output format: pretty, compact or json.
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install the bundle and activate it, reconciling the stores.
    Activate,
    /// Route one request and print what the worker did with it.
    Fetch {
        /// Path or URL relative to the origin.
        path: String,

        #[arg(long, default_value = "GET")]
        method: String,
    },
    /// Fetch every manifest resource missing from the content store.
    Populate,
    /// Deliver a control message: `skipWaiting` installs the bundle and
    /// activates it, `downloadOffline` tops up the content store.
    Message {
        /// `skipWaiting` or `downloadOffline`.
        text: String,
    },
    /// Print store coverage as JSON.
    Status,
}

/// Shared state of one invocation.
struct Session {
    config: WorkerConfig,
    scope: CacheScope,
    fetcher: Arc<ResourceLoader>,
}

impl Session {
    async fn open(cli: &Cli) -> Result<Self> {
        let config = WorkerConfig::load(&cli.bundle)
            .await
            .with_context(|| format!("loading bundle {}", cli.bundle.display()))?;

        let root = match &cli.store {
            Some(dir) => dir.clone(),
            None => dirs::cache_dir()
                .map(|dir| dir.join("appshell"))
                .context("no cache directory on this platform; pass --store")?,
        };
        let storage = DiskCacheStorage::new(&root)
            .await
            .with_context(|| format!("opening store {}", root.display()))?;

        let fetcher = ResourceLoader::new(LoaderConfig {
            default_timeout: Duration::from_secs(cli.timeout),
            ..LoaderConfig::default()
        })?;

        debug!(version = %config.version, store = %root.display(), "Session ready");
        Ok(Self {
            config,
            scope: CacheScope::new(Arc::new(storage)),
            fetcher: Arc::new(fetcher),
        })
    }

    fn worker(&self, config: WorkerConfig) -> Result<ServiceWorker> {
        Ok(ServiceWorker::new(
            config,
            self.scope.clone(),
            self.fetcher.clone(),
        )?)
    }
}

#[derive(Serialize)]
struct StoreStatus<'a> {
    version: &'a str,
    origin: &'a str,
    /// `current`, `outdated` or `none`.
    applied_manifest: &'static str,
    manifest_entries: usize,
    cached_entries: usize,
    missing: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format))?;

    let session = Session::open(&cli).await?;
    let result = match &cli.command {
        Command::Activate => activate(&session).await,
        Command::Fetch { path, method } => fetch(&session, path, method).await,
        Command::Populate => populate(&session).await,
        Command::Message { text } => message(&session, text).await,
        Command::Status => status(&session).await,
    };
    result.map_err(categorize)
}

/// Log worker failures with their error category before reporting them.
fn categorize(e: anyhow::Error) -> anyhow::Error {
    match e.downcast::<SwError>() {
        Ok(sw) => {
            let err = AppShellError::from(sw);
            error!(category = err.category(), error = %err, "Command failed");
            err.into()
        }
        Err(e) => e,
    }
}

async fn activate(session: &Session) -> Result<()> {
    let worker = session.worker(session.config.clone())?;
    let installed = worker.install().await?;
    println!("installed {}: {} core assets staged", worker.config().version, installed.staged);

    let outcome = match installed.activation {
        Some(outcome) => outcome,
        None => worker.activate().await?,
    };
    print_activation(&outcome);
    Ok(())
}

fn print_activation(outcome: &ActivationOutcome) {
    match outcome {
        ActivationOutcome::Reconciled(report) => {
            println!(
                "activated ({:?}): {} evicted, {} retained, {} staged",
                report.mode,
                report.evicted.len(),
                report.retained,
                report.staged
            );
            for url in &report.evicted {
                println!("  - {url}");
            }
        }
        ActivationOutcome::Reset { error } => {
            warn!(%error, "Activation reset every store");
            println!("activated with empty stores: {error}");
        }
    }
}

async fn fetch(session: &Session, path: &str, method: &str) -> Result<()> {
    let url = session
        .config
        .origin
        .join(path)
        .with_context(|| format!("'{path}' is not a valid address"))?;
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method '{method}'"))?;

    let router = RequestRouter::new(&session.config, &session.scope, session.fetcher.as_ref());
    match router.route(&Request::new(method, url.clone())).await? {
        FetchOutcome::PassThrough(reason) => println!("{url}: pass-through ({reason:?})"),
        FetchOutcome::Respond(response) => println!(
            "{url}: {} from {:?}, {} bytes",
            response.status,
            response.source,
            response.body.len()
        ),
    }
    Ok(())
}

async fn populate(session: &Session) -> Result<()> {
    let report = OfflinePopulator::new(&session.config, &session.scope, session.fetcher.as_ref())
        .populate()
        .await?;

    println!(
        "{} fetched, {} already cached",
        report.fetched.len(),
        report.already_cached
    );
    for key in &report.fetched {
        println!("  + {key}");
    }
    Ok(())
}

async fn message(session: &Session, text: &str) -> Result<()> {
    match ControlMessage::parse(text) {
        Some(ControlMessage::SkipWaiting) => {
            // Hold the version in the waiting state so the message decides.
            let worker = session.worker(session.config.clone().with_skip_waiting(false))?;
            worker.install().await?;
            match worker.handle_message(text).await? {
                MessageOutcome::SkipWaiting(Some(outcome)) => print_activation(&outcome),
                _ => println!("nothing to activate"),
            }
            Ok(())
        }
        Some(ControlMessage::DownloadOffline) => populate(session).await,
        None => bail!("unrecognized message '{text}'"),
    }
}

async fn status(session: &Session) -> Result<()> {
    let config = &session.config;
    let missing = OfflinePopulator::new(config, &session.scope, session.fetcher.as_ref())
        .missing()
        .await?;

    let manifest_store = session.scope.storage().open(&config.caches.manifest).await?;
    let applied = match manifest_store.match_url(&config.manifest_entry_url()?).await? {
        Some(entry) if Manifest::from_json(&entry.body)? == config.manifest => "current",
        Some(_) => "outdated",
        None => "none",
    };

    let status = StoreStatus {
        version: &config.version,
        origin: config.origin.as_str(),
        applied_manifest: applied,
        manifest_entries: config.manifest.len(),
        cached_entries: config.manifest.len() - missing.len(),
        missing: missing.iter().map(ToString::to_string).collect(),
    };
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
