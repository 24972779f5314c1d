//! fieldcache - drive the intercepting worker and the response cache from a
//! terminal.
//!
//! Requests made by `fetch` and `preload` go through both tiers: the response
//! cache first, then the worker, then the network.

mod platform;

use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fieldcache_core::cache::{AppCache, CachedClient, FetchOptions};
use fieldcache_core::net::{Fetcher, HttpFetcher};
use fieldcache_core::worker::{CacheStorage, DiskStorage, InterceptWorker, MemoryStorage};
use fieldcache_core::{Config, FetchError};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use platform::TerminalPlatform;

#[derive(Parser)]
#[command(name = "fieldcache", version, about = "Offline-first caching for the club app")]
struct Cli {
    /// Origin to serve, overriding the config file and FIELDCACHE_ORIGIN
    #[arg(long, global = true)]
    origin: Option<String>,

    /// Keep buckets in memory for this run only
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Install the worker and retire old bucket versions
    Install,
    /// Fetch paths through the response cache and the worker
    Fetch {
        paths: Vec<String>,
        /// How many passes to make over the paths
        #[arg(long, default_value_t = 2)]
        repeat: usize,
        /// Cache key parameter as NAME=VALUE
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Warm the response cache with the given paths
    Preload { paths: Vec<String> },
    /// List buckets and their entries
    Buckets,
    /// Show the notification a push with this body would produce
    Push { body: Option<String> },
    /// Print the effective configuration
    Config,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got {:?}", raw))
}

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG to control the level (e.g., RUST_LOG=fieldcache_core=debug).
fn init_tracing(log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .unwrap_or_else(|| OsStr::new("fieldcache.log"));
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref());

    let mut config = Config::load()?;
    if let Some(origin) = cli.origin.clone() {
        config.origin = origin;
    }
    info!(origin = %config.origin, "fieldcache starting");

    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Buckets => list_buckets(&config, cli.ephemeral).await,
        Command::Install => {
            let (worker, _) = build_worker(&config, cli.ephemeral)?;
            worker.run_lifecycle().await?;
            println!("Installed and activated {}", worker.bucket_name());
            Ok(())
        }
        Command::Push { body } => {
            let (worker, _) = build_worker(&config, cli.ephemeral)?;
            let notification = worker.handle_push(body.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&notification)?);
            Ok(())
        }
        Command::Fetch {
            paths,
            repeat,
            params,
        } => {
            let options = params
                .into_iter()
                .fold(FetchOptions::default(), |options, (name, value)| {
                    options.param(&name, value)
                });
            fetch(&config, cli.ephemeral, &paths, repeat, options).await
        }
        Command::Preload { paths } => preload(&config, cli.ephemeral, &paths).await,
    }
}

fn build_storage(config: &Config, ephemeral: bool) -> Result<Arc<dyn CacheStorage>> {
    if ephemeral {
        return Ok(Arc::new(MemoryStorage::new()));
    }
    Ok(Arc::new(DiskStorage::new(config.bucket_dir()?)?))
}

fn build_worker(
    config: &Config,
    ephemeral: bool,
) -> Result<(Arc<InterceptWorker>, Arc<dyn CacheStorage>)> {
    let storage = build_storage(config, ephemeral)?;
    let network: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new()?);
    let worker = InterceptWorker::new(
        config.worker.clone(),
        config.origin_url()?,
        Arc::clone(&storage),
        network,
        Arc::new(TerminalPlatform),
    );
    Ok((Arc::new(worker), storage))
}

/// Bring the worker to the activated state. A bucket left by an earlier
/// install is reused; otherwise the worker installs first.
async fn start_worker(config: &Config, ephemeral: bool) -> Result<Arc<InterceptWorker>> {
    let (worker, storage) = build_worker(config, ephemeral)?;
    let installed = storage
        .keys()
        .await?
        .iter()
        .any(|name| name == worker.bucket_name());

    if installed {
        worker.activate().await?;
    } else {
        worker
            .run_lifecycle()
            .await
            .context("Worker install failed; requests go straight to the network")
            .unwrap_or_else(|e| eprintln!("Warning: {:#}", e));
    }
    Ok(worker)
}

fn client_for(
    config: &Config,
    worker: Arc<InterceptWorker>,
) -> Result<CachedClient<Arc<InterceptWorker>>> {
    let cache = Arc::new(AppCache::from_config(&config.cache));
    Ok(CachedClient::new(worker, cache).with_base(config.origin_url()?))
}

async fn fetch(
    config: &Config,
    ephemeral: bool,
    paths: &[String],
    repeat: usize,
    options: FetchOptions,
) -> Result<()> {
    let worker = start_worker(config, ephemeral).await?;
    let client = client_for(config, worker)?;
    let sweeper = client.cache().spawn_sweeper(config.cache.cleanup_interval());

    for pass in 1..=repeat {
        for path in paths {
            match client.cached_fetch(path, options.clone()).await {
                Ok(response) => {
                    let source = match (response.from_cache, response.from_error) {
                        (true, true) => "cache (network failed)",
                        (true, false) => "cache",
                        _ => "network",
                    };
                    let preview = FetchError::truncate_body(&response.text());
                    println!(
                        "[{}] {} {} from {}: {}",
                        pass,
                        response.status.as_u16(),
                        path,
                        source,
                        preview
                    );
                }
                Err(e) => println!("[{}] {} failed: {}", pass, path, e),
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&client.cache().stats())?);
    sweeper.shutdown().await;
    Ok(())
}

async fn preload(config: &Config, ephemeral: bool, paths: &[String]) -> Result<()> {
    let worker = start_worker(config, ephemeral).await?;
    let client = client_for(config, worker)?;

    let report = client.preload(paths).await;
    println!(
        "Preloaded {} of {} ({} failed)",
        report.succeeded,
        paths.len(),
        report.failed
    );
    println!("{}", serde_json::to_string_pretty(&client.cache().stats())?);
    Ok(())
}

async fn list_buckets(config: &Config, ephemeral: bool) -> Result<()> {
    if ephemeral {
        println!("No buckets: ephemeral storage lives only for a single run");
        return Ok(());
    }

    let storage = DiskStorage::new(config.bucket_dir()?)?;
    let names = storage.keys().await?;
    if names.is_empty() {
        println!("No buckets");
    }
    for name in names {
        let marker = if name == config.worker.cache_version {
            " (current)"
        } else {
            ""
        };
        println!("{}{}", name, marker);
        for entry in storage.bucket(&name)?.entry_ages().await? {
            println!("  {} {} [{}]", entry.status, entry.identity, entry.age);
        }
    }
    Ok(())
}
