mod cache;
mod config;
mod event;
mod host;
mod http;
mod logging;
mod network;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use url::Url;

use cache::{CacheSource, CacheStorage, CacheStore, MemoryStorage, SqliteStorage};
use config::{Config, StorageBackend};
use host::Host;
use http::Request;
use network::{HttpNetwork, Network};
use worker::{Interceptor, Manifest};

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline app-shell cache with versioned stores")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./shellcache.yaml or $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache version to run as, overriding the config
  #[arg(long)]
  version_tag: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the app shell and activate this version
  Install,
  /// Drop caches of other versions and take control
  Activate,
  /// Route requests through the interceptor
  Fetch {
    /// Absolute URLs, or paths relative to the scope
    #[arg(required = true)]
    urls: Vec<String>,
    /// Treat the requests as page navigations
    #[arg(long)]
    navigate: bool,
  },
  /// List cache stores and their entries
  Caches,
  /// Remove entries from the current version's store
  Evict {
    /// Absolute URLs, or paths relative to the scope
    #[arg(required = true)]
    urls: Vec<String>,
  },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let config = match args.version_tag {
    Some(version) => config.with_version(version)?,
    None => config,
  };

  let _log_guard = logging::init(config.log_dir.as_deref())?;

  match config.storage.backend {
    StorageBackend::Sqlite => {
      let storage = SqliteStorage::open(&config.database_path()?)?;
      run(args.command, &config, storage).await
    }
    StorageBackend::Memory => run(args.command, &config, MemoryStorage::default()).await,
  }
}

async fn run<S>(command: Command, config: &Config, storage: S) -> Result<()>
where
  S: CacheStorage + Clone,
{
  let manifest = Manifest::from_config(config)?;
  let network = Arc::new(HttpNetwork::new(&config.network)?);
  let worker = Interceptor::new(storage.clone(), Arc::clone(&network), manifest.clone());
  let host = Host::spawn(worker.register(), network as Arc<dyn Network>);

  match command {
    Command::Install => {
      let outcome = host.install().await?;
      println!(
        "installed {}: {} stored, {} skipped",
        outcome.install.version,
        outcome.install.stored.len(),
        outcome.install.failed.len()
      );
      for url in &outcome.install.failed {
        println!("  skipped {}", url);
      }
      if let Some(activation) = outcome.activation {
        println!("activated: removed {:?}", activation.deleted);
      }
    }
    Command::Activate => {
      let report = host.activate().await?;
      println!("activated {}: removed {:?}", report.version, report.deleted);
    }
    Command::Fetch { urls, navigate } => {
      boot(&host, &storage, &manifest).await?;

      let requests = urls
        .iter()
        .map(|raw| -> Result<Request> {
          let url = resolve(&manifest.scope, raw)?;
          Ok(if navigate {
            Request::navigate(url)
          } else {
            Request::get(url)
          })
        })
        .collect::<Result<Vec<_>>>()?;

      let results = join_all(requests.iter().map(|r| host.fetch(r.clone()))).await;
      for (request, result) in requests.iter().zip(results) {
        match result {
          Ok(routed) => {
            let age = match (routed.source, routed.cached_at) {
              (CacheSource::Network, _) | (_, None) => String::new(),
              (_, Some(at)) => format!("  (cached {})", at.format("%Y-%m-%d %H:%M:%S")),
            };
            println!(
              "{} {:<8} {:>8} bytes  {}{}",
              routed.data.status.as_u16(),
              routed.source,
              routed.data.body.len(),
              request.url,
              age
            );
          }
          Err(e) => println!("ERR {}: {}", request.url, e),
        }
      }
    }
    Command::Caches => list_caches(&storage, &manifest.version).await?,
    Command::Evict { urls } => {
      if !storage.has(&manifest.version).await? {
        return Err(eyre!("No cache store for version {}", manifest.version));
      }
      let store = storage.open(&manifest.version).await?;
      for raw in &urls {
        let request = Request::get(resolve(&manifest.scope, raw)?);
        let removed = store.delete(&request).await?;
        println!(
          "{} {} from {}",
          if removed { "evicted" } else { "not cached" },
          request.url,
          store.name()
        );
      }
    }
  }

  Ok(())
}

/// Resume an installed version, or install it if its store does not exist yet.
async fn boot<S: CacheStorage>(host: &Host, storage: &S, manifest: &Manifest) -> Result<()> {
  if storage.has(&manifest.version).await? {
    info!(version = %manifest.version, "Resuming installed version");
    host.activate().await?;
  } else {
    host.install().await?;
  }
  info!(version = %manifest.version, state = ?host.state(), "Worker ready");
  Ok(())
}

fn resolve(scope: &Url, raw: &str) -> Result<Url> {
  Url::parse(raw)
    .or_else(|_| scope.join(raw))
    .map_err(|e| eyre!("Invalid URL '{}': {}", raw, e))
}

async fn list_caches<S: CacheStorage>(storage: &S, current: &str) -> Result<()> {
  for name in storage.keys().await? {
    let marker = if name == current { "*" } else { " " };
    let store = storage.open(&name).await?;
    let entries = store.entries().await?;
    println!("{} {} ({} entries)", marker, store.name(), entries.len());
    for entry in entries {
      println!(
        "    {} {:>8} bytes  {}  {}",
        entry.response.status.as_u16(),
        entry.response.body.len(),
        entry.cached_at.format("%Y-%m-%d %H:%M:%S"),
        entry.url
      );
    }
  }
  Ok(())
}
