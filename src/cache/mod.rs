//! Versioned response caching for offline support.
//!
//! This module provides:
//! - Named cache stores, one per cache version, behind [`CacheStorage`]
//! - Exact request matching, including `Vary` rules ([`CacheEntry`])
//! - SQLite and in-memory backends
//! - Source tagging for every served response ([`CacheResult`])

mod entry;
mod memory;
mod storage;
mod traits;

pub use entry::CacheEntry;
pub use memory::MemoryStorage;
pub use storage::SqliteStorage;
pub use traits::{CacheResult, CacheSource, CacheStorage, CacheStore};
