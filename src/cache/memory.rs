//! In-memory cache storage, used with the `memory` backend and in tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::entry::{entry_key, CacheEntry};
use super::traits::{CacheStorage, CacheStore};
use crate::http::Request;

type Entries = Arc<RwLock<HashMap<String, CacheEntry>>>;

/// Process-local storage. Clones share the same stores.
#[derive(Clone, Default)]
pub struct MemoryStorage {
  /// Insertion-ordered (name, entries) pairs
  stores: Arc<RwLock<Vec<(String, Entries)>>>,
}

/// Handle to one in-memory store.
#[derive(Clone)]
pub struct MemoryStore {
  name: String,
  entries: Entries,
  storage: MemoryStorage,
}

impl MemoryStore {
  /// False once the store has been deleted from its storage.
  fn is_live(&self) -> Result<bool> {
    let stores = self
      .storage
      .stores
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      stores
        .iter()
        .any(|(_, entries)| Arc::ptr_eq(entries, &self.entries)),
    )
  }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
  type Store = MemoryStore;

  async fn open(&self, name: &str) -> Result<MemoryStore> {
    let mut stores = self
      .stores
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let entries = match stores.iter().find(|(n, _)| n == name) {
      Some((_, entries)) => Arc::clone(entries),
      None => {
        let entries = Entries::default();
        stores.push((name.to_string(), Arc::clone(&entries)));
        entries
      }
    };

    Ok(MemoryStore {
      name: name.to_string(),
      entries,
      storage: self.clone(),
    })
  }

  async fn has(&self, name: &str) -> Result<bool> {
    let stores = self
      .stores
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.iter().any(|(n, _)| n == name))
  }

  async fn delete(&self, name: &str) -> Result<bool> {
    let mut stores = self
      .stores
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = stores.len();
    stores.retain(|(n, _)| n != name);
    Ok(stores.len() != before)
  }

  async fn keys(&self) -> Result<Vec<String>> {
    let stores = self
      .stores
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(stores.iter().map(|(n, _)| n.clone()).collect())
  }
}

#[async_trait]
impl CacheStore for MemoryStore {
  fn name(&self) -> &str {
    &self.name
  }

  async fn match_request(&self, request: &Request) -> Result<Option<CacheEntry>> {
    let entries = self
      .entries
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      entries
        .get(&entry_key(&request.url))
        .filter(|entry| entry.matches(request))
        .cloned(),
    )
  }

  async fn put(&self, entry: CacheEntry) -> Result<()> {
    if !self.is_live()? {
      return Ok(());
    }
    let mut entries = self
      .entries
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.insert(entry.key(), entry);
    Ok(())
  }

  async fn delete(&self, request: &Request) -> Result<bool> {
    let mut entries = self
      .entries
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let key = entry_key(&request.url);
    let matched = entries.get(&key).is_some_and(|entry| entry.matches(request));
    if matched {
      entries.remove(&key);
    }
    Ok(matched)
  }

  async fn entries(&self) -> Result<Vec<CacheEntry>> {
    let entries = self
      .entries
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut all: Vec<CacheEntry> = entries.values().cloned().collect();
    all.sort_by(|a, b| a.url.as_str().cmp(b.url.as_str()));
    Ok(all)
  }
}
