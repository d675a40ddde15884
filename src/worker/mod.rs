//! The request interceptor: a versioned app-shell cache with three lifecycle phases.
//!
//! - install: [`Interceptor::install`] pre-caches the asset list
//! - activate: [`Interceptor::activate`] drops the caches of older versions
//! - fetch: [`Interceptor::handle_fetch`] routes each request to a cache strategy

mod provision;
mod reconcile;
mod router;

use color_eyre::{eyre::eyre, Result};
use futures::FutureExt;
use std::sync::Arc;
use tracing::warn;
use url::{Origin, Url};

use crate::cache::{CacheEntry, CacheStorage, CacheStore};
use crate::config::Config;
use crate::event::{Event, EventKind, Registry, Settled};
use crate::http::{Request, Response};
use crate::network::Network;

pub use provision::InstallReport;
pub use reconcile::ActivateReport;
pub use router::FetchOutcome;

/// Everything that identifies one deployed version of the app shell.
#[derive(Debug, Clone)]
pub struct Manifest {
  /// Name of the current cache store
  pub version: String,
  pub scope: Url,
  /// Absolute URLs pre-cached on install
  pub assets: Vec<Url>,
  /// Absolute URL of the offline navigation document
  pub fallback: Url,
}

impl Manifest {
  pub fn from_config(config: &Config) -> Result<Self> {
    let scope = Url::parse(&config.scope)
      .map_err(|e| eyre!("Invalid scope URL '{}': {}", config.scope, e))?;

    let assets = config
      .assets
      .iter()
      .map(|path| {
        scope
          .join(path)
          .map_err(|e| eyre!("Invalid asset path '{}': {}", path, e))
      })
      .collect::<Result<Vec<_>>>()?;

    let fallback = scope.join(&config.fallback_document).map_err(|e| {
      eyre!(
        "Invalid fallback document '{}': {}",
        config.fallback_document,
        e
      )
    })?;

    Ok(Self {
      version: config.cache_version.clone(),
      scope,
      assets,
      fallback,
    })
  }

  /// The interceptor's own origin.
  pub fn origin(&self) -> Origin {
    self.scope.origin()
  }
}

/// Caching policy over an injected storage and network.
pub struct Interceptor<S: CacheStorage, N: Network> {
  storage: Arc<S>,
  network: Arc<N>,
  manifest: Arc<Manifest>,
}

impl<S: CacheStorage, N: Network + 'static> Interceptor<S, N> {
  pub fn new(storage: S, network: Arc<N>, manifest: Manifest) -> Self {
    Self {
      storage: Arc::new(storage),
      network,
      manifest: Arc::new(manifest),
    }
  }

  /// Look up a request in the current store without creating it.
  async fn lookup(&self, request: &Request) -> Result<Option<CacheEntry>> {
    if !self.storage.has(&self.manifest.version).await? {
      return Ok(None);
    }
    let store = self.storage.open(&self.manifest.version).await?;
    store.match_request(request).await
  }

  /// Write a copy of `response` to the current store without holding up the caller.
  fn spawn_cache_write(&self, request: Request, response: Response) {
    let storage = Arc::clone(&self.storage);
    let version = self.manifest.version.clone();

    tokio::spawn(async move {
      let url = request.url.clone();
      let result = async {
        let entry = CacheEntry::new(&request, response)?;
        storage.open(&version).await?.put(entry).await
      }
      .await;

      if let Err(e) = result {
        warn!(%url, error = %e, "Failed to update cache");
      }
    });
  }

  /// Build the handler table the host dispatches lifecycle and fetch events to.
  pub fn register(self) -> Registry {
    let mut registry = Registry::default();

    let worker = self.clone();
    registry.on(EventKind::Install, move |_| {
      let worker = worker.clone();
      async move { Settled::Installed(worker.install().await) }.boxed()
    });

    let worker = self.clone();
    registry.on(EventKind::Activate, move |_| {
      let worker = worker.clone();
      async move { Settled::Activated(worker.activate().await) }.boxed()
    });

    let worker = self;
    registry.on(EventKind::Fetch, move |event| {
      let worker = worker.clone();
      async move {
        match event {
          Event::Fetch(request) => Settled::Fetched(worker.handle_fetch(request).await),
          _ => Settled::Ignored,
        }
      }
      .boxed()
    });

    registry
  }
}

impl<S: CacheStorage, N: Network> Clone for Interceptor<S, N> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      manifest: Arc::clone(&self.manifest),
    }
  }
}

#[cfg(test)]
pub(crate) mod test_support {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::testing::FakeNetwork;
  use std::time::Duration;

  pub const SCOPE: &str = "https://app.test/";

  pub fn manifest(version: &str) -> Manifest {
    let config = Config {
      cache_version: version.to_string(),
      scope: SCOPE.to_string(),
      ..Config::default()
    };
    Manifest::from_config(&config).unwrap()
  }

  pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  pub fn interceptor(
    version: &str,
  ) -> (
    Interceptor<MemoryStorage, FakeNetwork>,
    MemoryStorage,
    Arc<FakeNetwork>,
  ) {
    let storage = MemoryStorage::default();
    let network = Arc::new(FakeNetwork::default());
    let worker = Interceptor::new(storage.clone(), Arc::clone(&network), manifest(version));
    (worker, storage, network)
  }

  /// Entry for `url` in store `version`, if present.
  pub async fn cached(storage: &MemoryStorage, version: &str, url: &str) -> Option<CacheEntry> {
    if !storage.has(version).await.unwrap() {
      return None;
    }
    let store = storage.open(version).await.unwrap();
    store.match_request(&Request::get(self::url(url))).await.unwrap()
  }

  /// Wait for a spawned cache write of `url` to land in store `version`.
  pub async fn wait_cached(storage: &MemoryStorage, version: &str, url: &str) -> CacheEntry {
    let poll = async {
      loop {
        if let Some(entry) = cached(storage, version, url).await {
          return entry;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
      }
    };
    tokio::time::timeout(Duration::from_secs(2), poll)
      .await
      .unwrap_or_else(|_| panic!("{url} never reached cache {version}"))
  }

  /// Give spawned tasks time to run before checking that something did not happen.
  pub async fn quiesce() {
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
}
