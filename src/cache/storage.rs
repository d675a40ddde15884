//! SQLite-backed cache storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;
use url::Url;

use super::entry::{entry_key, CacheEntry};
use super::traits::{CacheStorage, CacheStore};
use crate::http::{Request, Response};

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
  conn: Arc<Mutex<Connection>>,
}

/// Handle to one store inside a [`SqliteStorage`] database.
#[derive(Clone)]
pub struct SqliteStore {
  name: String,
  conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Arc::new(Mutex::new(conn)),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per cache version
CREATE TABLE IF NOT EXISTS cache_stores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    store_name TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    url TEXT NOT NULL,
    request_headers TEXT NOT NULL,
    status INTEGER NOT NULL,
    response_headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_name, entry_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_store ON cache_entries(store_name);
"#;

#[async_trait]
impl CacheStorage for SqliteStorage {
  type Store = SqliteStore;

  async fn open(&self, name: &str) -> Result<SqliteStore> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create cache store {}: {}", name, e))?;

    Ok(SqliteStore {
      name: name.to_string(),
      conn: Arc::clone(&self.conn),
    })
  }

  async fn has(&self, name: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    store_exists(&conn, name)
  }

  async fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE store_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;

    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache store {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  async fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }
}

#[async_trait]
impl CacheStore for SqliteStore {
  fn name(&self) -> &str {
    &self.name
  }

  async fn match_request(&self, request: &Request) -> Result<Option<CacheEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT url, request_headers, status, response_headers, body, cached_at
         FROM cache_entries WHERE store_name = ? AND entry_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row = stmt
      .query_row(params![self.name, entry_key(&request.url)], read_row)
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", request.url, e))?;

    match row {
      Some(row) => {
        let entry = row.into_entry()?;
        Ok(entry.matches(request).then_some(entry))
      }
      None => Ok(None),
    }
  }

  async fn put(&self, entry: CacheEntry) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if !store_exists(&conn, &self.name)? {
      debug!(store = %self.name, url = %entry.url, "dropping write to deleted store");
      return Ok(());
    }

    let request_headers = encode_headers(&entry.request_headers)?;
    let response_headers = encode_headers(&entry.response.headers)?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (store_name, entry_key, url, request_headers, status, response_headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          self.name,
          entry.key(),
          entry.url.as_str(),
          request_headers,
          entry.response.status.as_u16(),
          response_headers,
          entry.response.body.as_ref(),
          format_datetime(&entry.cached_at),
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", entry.url, e))?;

    Ok(())
  }

  async fn delete(&self, request: &Request) -> Result<bool> {
    if self.match_request(request).await?.is_none() {
      return Ok(false);
    }

    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE store_name = ? AND entry_key = ?",
        params![self.name, entry_key(&request.url)],
      )
      .map_err(|e| eyre!("Failed to delete {}: {}", request.url, e))?;

    Ok(removed > 0)
  }

  async fn entries(&self) -> Result<Vec<CacheEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT url, request_headers, status, response_headers, body, cached_at
         FROM cache_entries WHERE store_name = ? ORDER BY url",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![self.name], read_row)
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<Vec<EntryRow>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    rows.into_iter().map(EntryRow::into_entry).collect()
  }
}

fn store_exists(conn: &Connection, name: &str) -> Result<bool> {
  let found: Option<i64> = conn
    .query_row(
      "SELECT 1 FROM cache_stores WHERE name = ?",
      params![name],
      |row| row.get(0),
    )
    .optional()
    .map_err(|e| eyre!("Failed to query cache store {}: {}", name, e))?;
  Ok(found.is_some())
}

/// Raw columns of one `cache_entries` row.
struct EntryRow {
  url: String,
  request_headers: String,
  status: u16,
  response_headers: String,
  body: Vec<u8>,
  cached_at: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntryRow> {
  Ok(EntryRow {
    url: row.get(0)?,
    request_headers: row.get(1)?,
    status: row.get(2)?,
    response_headers: row.get(3)?,
    body: row.get(4)?,
    cached_at: row.get(5)?,
  })
}

impl EntryRow {
  fn into_entry(self) -> Result<CacheEntry> {
    let url =
      Url::parse(&self.url).map_err(|e| eyre!("Invalid cached URL '{}': {}", self.url, e))?;
    let status = StatusCode::from_u16(self.status)
      .map_err(|e| eyre!("Invalid cached status {} for {}: {}", self.status, url, e))?;

    Ok(CacheEntry {
      request_headers: decode_headers(&self.request_headers)?,
      response: Response {
        status,
        headers: decode_headers(&self.response_headers)?,
        body: self.body.into(),
      },
      cached_at: parse_datetime(&self.cached_at)?,
      url,
    })
  }
}

/// Headers are stored as a JSON list of (name, raw value bytes) pairs to keep
/// repeats, order and values that are not UTF-8.
fn encode_headers(headers: &HeaderMap) -> Result<String> {
  let pairs: Vec<(&str, &[u8])> = headers
    .iter()
    .map(|(name, value)| (name.as_str(), value.as_bytes()))
    .collect();
  serde_json::to_string(&pairs).map_err(|e| eyre!("Failed to serialize headers: {}", e))
}

fn decode_headers(json: &str) -> Result<HeaderMap> {
  let pairs: Vec<(String, Vec<u8>)> =
    serde_json::from_str(json).map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

  let mut headers = HeaderMap::new();
  for (name, value) in pairs {
    // Skip anything that no longer parses rather than losing the whole entry
    if let (Ok(name), Ok(value)) = (
      HeaderName::from_bytes(name.as_bytes()),
      HeaderValue::from_bytes(&value),
    ) {
      headers.append(name, value);
    }
  }
  Ok(headers)
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
  dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
