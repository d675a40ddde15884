use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use tracing::{debug, info, warn};
use url::Url;

use super::Interceptor;
use crate::cache::{CacheEntry, CacheStorage, CacheStore};
use crate::http::{CacheMode, Request};
use crate::network::Network;

/// What an install pass managed to pre-cache.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
  pub version: String,
  pub stored: Vec<Url>,
  pub failed: Vec<Url>,
  /// Ask the host to activate immediately instead of waiting for old pages to close
  pub skip_waiting: bool,
}

impl<S: CacheStorage, N: Network + 'static> Interceptor<S, N> {
  /// Pre-cache every asset into the current version's store.
  ///
  /// Never fails: unreachable assets are left out and reported.
  pub async fn install(&self) -> InstallReport {
    let version = self.manifest.version.clone();
    info!(%version, assets = self.manifest.assets.len(), "Installing");

    let mut report = InstallReport {
      version,
      skip_waiting: true,
      ..InstallReport::default()
    };

    let store = match self.storage.open(&report.version).await {
      Ok(store) => store,
      Err(e) => {
        warn!(version = %report.version, error = %e, "Failed to open cache store");
        report.failed = self.manifest.assets.clone();
        return report;
      }
    };

    let results = join_all(
      self
        .manifest
        .assets
        .iter()
        .map(|url| self.provision_asset(&store, url)),
    )
    .await;

    for (url, result) in self.manifest.assets.iter().zip(results) {
      match result {
        Ok(()) => report.stored.push(url.clone()),
        Err(e) => {
          warn!(%url, error = %e, "Skipping asset");
          report.failed.push(url.clone());
        }
      }
    }

    info!(
      version = %report.version,
      stored = report.stored.len(),
      failed = report.failed.len(),
      "Installed"
    );
    report
  }

  async fn provision_asset(&self, store: &S::Store, url: &Url) -> Result<()> {
    let request = Request::get(url.clone()).with_cache_mode(CacheMode::Reload);
    let response = self.network.fetch(&request).await?;

    if !response.is_ok() {
      return Err(eyre!("{} responded with {}", url, response.status));
    }

    store.put(CacheEntry::new(&request, response)?).await?;
    debug!(%url, "Pre-cached");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::super::test_support::*;
  use crate::cache::{CacheStorage, CacheStore};
  use crate::http::{CacheMode, Response};
  use reqwest::StatusCode;

  fn serve_shell(network: &crate::testing::FakeNetwork) {
    network.serve("https://app.test/", Response::ok("index"));
    network.serve("https://app.test/or_notebook.html", Response::ok("shell"));
    network.serve("https://app.test/manifest.json", Response::ok("{}"));
    network.serve("https://app.test/favicon.svg", Response::ok("<svg/>"));
  }

  #[tokio::test]
  async fn test_install_caches_every_reachable_asset() {
    let (worker, storage, network) = interceptor("v1");
    serve_shell(&network);

    let report = worker.install().await;

    assert_eq!(report.stored.len(), 4);
    assert!(report.failed.is_empty());
    assert!(report.skip_waiting);
    for asset in [
      "https://app.test/",
      "https://app.test/or_notebook.html",
      "https://app.test/manifest.json",
      "https://app.test/favicon.svg",
    ] {
      assert!(cached(&storage, "v1", asset).await.is_some(), "{asset}");
    }
  }

  #[tokio::test]
  async fn test_install_bypasses_http_cache() {
    let (worker, _, network) = interceptor("v1");
    serve_shell(&network);

    worker.install().await;

    let requests = network.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests.iter().all(|r| r.cache == CacheMode::Reload));
  }

  #[tokio::test]
  async fn test_install_swallows_missing_assets() {
    let (worker, storage, network) = interceptor("v1");
    network.serve("https://app.test/or_notebook.html", Response::ok("shell"));
    network.serve(
      "https://app.test/manifest.json",
      Response::new(StatusCode::NOT_FOUND, "missing"),
    );

    let report = worker.install().await;

    assert_eq!(report.stored.len(), 1);
    assert_eq!(report.failed.len(), 3);
    assert!(report.skip_waiting);
    assert!(cached(&storage, "v1", "https://app.test/or_notebook.html")
      .await
      .is_some());
    assert!(cached(&storage, "v1", "https://app.test/manifest.json")
      .await
      .is_none());
    assert!(cached(&storage, "v1", "https://app.test/favicon.svg")
      .await
      .is_none());
  }

  #[tokio::test]
  async fn test_install_offline_still_completes() {
    let (worker, storage, network) = interceptor("v1");
    network.set_offline(true);

    let report = worker.install().await;

    assert!(report.stored.is_empty());
    assert_eq!(report.failed.len(), 4);
    assert_eq!(storage.keys().await.unwrap(), vec!["v1"]);
  }

  #[tokio::test]
  async fn test_repeated_install_is_idempotent() {
    let (worker, storage, network) = interceptor("v1");
    serve_shell(&network);

    worker.install().await;
    let first = storage.open("v1").await.unwrap();
    let before: Vec<String> = first
      .entries()
      .await
      .unwrap()
      .iter()
      .map(|e| e.url.to_string())
      .collect();

    let report = worker.install().await;
    assert!(report.failed.is_empty());

    let after: Vec<String> = first
      .entries()
      .await
      .unwrap()
      .iter()
      .map(|e| e.url.to_string())
      .collect();
    assert_eq!(before, after);
    assert_eq!(after.len(), 4);
    assert_eq!(storage.keys().await.unwrap(), vec!["v1"]);
  }
}
