use futures::future::join_all;
use tracing::{info, warn};

use super::Interceptor;
use crate::cache::CacheStorage;
use crate::network::Network;

/// Outcome of garbage-collecting old cache versions.
#[derive(Debug, Clone, Default)]
pub struct ActivateReport {
  pub version: String,
  pub deleted: Vec<String>,
  pub failed: Vec<String>,
  /// Ask the host to route already-open pages through this interceptor
  pub claim: bool,
}

impl<S: CacheStorage, N: Network + 'static> Interceptor<S, N> {
  /// Delete every store except the current version's, then claim open pages.
  ///
  /// Every stale store is attempted even when others fail. Never fails.
  pub async fn activate(&self) -> ActivateReport {
    let version = self.manifest.version.clone();
    info!(%version, "Activating");

    let names = match self.storage.keys().await {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "Failed to list cache stores");
        Vec::new()
      }
    };

    let stale: Vec<String> = names.into_iter().filter(|name| *name != version).collect();
    let results = join_all(stale.iter().map(|name| self.storage.delete(name))).await;

    let mut report = ActivateReport {
      version,
      claim: true,
      ..ActivateReport::default()
    };

    for (name, result) in stale.into_iter().zip(results) {
      match result {
        Ok(_) => report.deleted.push(name),
        Err(e) => {
          warn!(store = %name, error = %e, "Failed to delete stale cache store");
          report.failed.push(name);
        }
      }
    }

    info!(
      version = %report.version,
      deleted = report.deleted.len(),
      failed = report.failed.len(),
      "Activated"
    );
    report
  }
}

#[cfg(test)]
mod tests {
  use super::super::test_support::*;
  use super::super::Interceptor;
  use crate::cache::{CacheStorage, MemoryStorage};
  use crate::testing::FakeNetwork;
  use async_trait::async_trait;
  use color_eyre::{eyre::eyre, Result};
  use std::sync::Arc;

  /// Memory storage whose deletes fail for one name.
  #[derive(Clone)]
  struct StubbornStorage {
    inner: MemoryStorage,
    stuck: String,
  }

  #[async_trait]
  impl CacheStorage for StubbornStorage {
    type Store = <MemoryStorage as CacheStorage>::Store;

    async fn open(&self, name: &str) -> Result<Self::Store> {
      self.inner.open(name).await
    }

    async fn has(&self, name: &str) -> Result<bool> {
      self.inner.has(name).await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
      if name == self.stuck {
        return Err(eyre!("store {} is locked", name));
      }
      self.inner.delete(name).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
      self.inner.keys().await
    }
  }

  #[tokio::test]
  async fn test_activate_leaves_only_current_store() {
    let (worker, storage, _) = interceptor("v3");
    for name in ["v1", "v3", "v2", "scratch"] {
      storage.open(name).await.unwrap();
    }

    let report = worker.activate().await;

    assert_eq!(storage.keys().await.unwrap(), vec!["v3"]);
    assert_eq!(report.deleted, vec!["v1", "v2", "scratch"]);
    assert!(report.failed.is_empty());
    assert!(report.claim);
  }

  #[tokio::test]
  async fn test_activate_without_current_store() {
    let (worker, storage, _) = interceptor("v2");
    storage.open("v1").await.unwrap();

    let report = worker.activate().await;

    assert!(storage.keys().await.unwrap().is_empty());
    assert_eq!(report.deleted, vec!["v1"]);
  }

  #[tokio::test]
  async fn test_one_failed_delete_does_not_block_others() {
    let inner = MemoryStorage::default();
    for name in ["v1", "v2", "v3", "v4"] {
      inner.open(name).await.unwrap();
    }
    let storage = StubbornStorage {
      inner: inner.clone(),
      stuck: "v2".to_string(),
    };
    let worker = Interceptor::new(storage, Arc::new(FakeNetwork::default()), manifest("v4"));

    let report = worker.activate().await;

    assert_eq!(report.failed, vec!["v2"]);
    assert_eq!(report.deleted, vec!["v1", "v3"]);
    assert!(report.claim);
    assert_eq!(inner.keys().await.unwrap(), vec!["v2", "v4"]);
  }
}
