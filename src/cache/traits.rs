//! Storage seams and result types for the caching system.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::Result;

use super::entry::CacheEntry;
use crate::http::Request;

/// Named collection of cache stores, one per cache version.
#[async_trait]
pub trait CacheStorage: Send + Sync + 'static {
  type Store: CacheStore;

  /// Open the store with this name, creating it if absent.
  async fn open(&self, name: &str) -> Result<Self::Store>;

  /// Whether a store with this name exists.
  async fn has(&self, name: &str) -> Result<bool>;

  /// Delete a store and all of its entries. Returns false if it did not exist.
  async fn delete(&self, name: &str) -> Result<bool>;

  /// Names of all stores, in creation order.
  async fn keys(&self) -> Result<Vec<String>>;
}

/// Handle to one named store.
///
/// Writes to a handle whose store has since been deleted are dropped.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
  fn name(&self) -> &str;

  /// Find the entry matching this request exactly.
  async fn match_request(&self, request: &Request) -> Result<Option<CacheEntry>>;

  /// Insert or replace the entry for the entry's request identity.
  async fn put(&self, entry: CacheEntry) -> Result<()>;

  /// Remove the entry matching this request. Returns false if none matched.
  async fn delete(&self, request: &Request) -> Result<bool>;

  /// All entries, ordered by URL.
  async fn entries(&self) -> Result<Vec<CacheEntry>>;
}

/// A response together with where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from a cache hit that never touched the network.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result served in place of an unreachable document.
  pub fn fallback(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Fallback,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Cache hit, network not consulted
  Cache,
  /// Network unavailable, serving the cached copy of the same request
  Offline,
  /// Network unavailable, serving the app shell instead of the requested document
  Fallback,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let label = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Offline => "offline",
      Self::Fallback => "fallback",
    };
    f.pad(label)
  }
}
