use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that overrides `cache_version`.
pub const VERSION_ENV: &str = "SHELLCACHE_CACHE_VERSION";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Name of the current cache generation. Bump it whenever `assets` changes.
  pub cache_version: String,
  /// Base URL the app shell is served from; its origin is the "own" origin
  pub scope: String,
  /// Paths pre-cached on install, relative to `scope`
  pub assets: Vec<String>,
  /// Document served when a navigation cannot reach the network
  pub fallback_document: String,
  pub storage: StorageConfig,
  pub network: NetworkConfig,
  /// Write logs to a daily file in this directory instead of stderr
  pub log_dir: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      cache_version: "or-notebook-v1".to_string(),
      scope: "http://localhost:8000/".to_string(),
      assets: vec![
        "/".to_string(),
        "or_notebook.html".to_string(),
        "manifest.json".to_string(),
        "favicon.svg".to_string(),
      ],
      fallback_document: "or_notebook.html".to_string(),
      storage: StorageConfig::default(),
      network: NetworkConfig::default(),
      log_dir: None,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
  /// Persistent SQLite database
  #[default]
  Sqlite,
  /// Process-local, lost on exit
  Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  pub backend: StorageBackend,
  /// Database path (default: $XDG_DATA_HOME/shellcache/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  pub timeout_secs: u64,
  pub user_agent: String,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 30,
      user_agent: concat!("shellcache/", env!("CARGO_PKG_VERSION")).to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  ///
  /// Without any file the built-in defaults are used. `SHELLCACHE_CACHE_VERSION`
  /// overrides the cache version in every case.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    Ok(config.with_env_overrides())
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  /// Run as `version` instead of the configured cache version.
  pub fn with_version(self, version: String) -> Result<Self> {
    let config = Config {
      cache_version: version,
      ..self
    };
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.cache_version.trim().is_empty() {
      return Err(eyre!("cache_version must not be empty"));
    }
    Ok(())
  }

  fn with_env_overrides(self) -> Self {
    match std::env::var(VERSION_ENV) {
      Ok(version) if !version.trim().is_empty() => Config {
        cache_version: version,
        ..self
      },
      _ => self,
    }
  }

  /// Resolved database path for the SQLite backend.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.storage.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellcache").join("cache.db"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_describe_notebook_shell() {
    let config = Config::default();
    assert_eq!(config.cache_version, "or-notebook-v1");
    assert_eq!(
      config.assets,
      vec!["/", "or_notebook.html", "manifest.json", "favicon.svg"]
    );
    assert_eq!(config.fallback_document, "or_notebook.html");
    assert_eq!(config.storage.backend, StorageBackend::Sqlite);
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      "cache_version: notebook-v7\nscope: https://notes.example/app/\nstorage:\n  backend: memory\n",
    )
    .unwrap();
    assert_eq!(config.cache_version, "notebook-v7");
    assert_eq!(config.scope, "https://notes.example/app/");
    assert_eq!(config.storage.backend, StorageBackend::Memory);
    assert_eq!(config.assets.len(), 4);
    assert_eq!(config.network.timeout_secs, 30);
  }

  #[test]
  fn test_empty_version_rejected() {
    assert!(Config::from_yaml("cache_version: '  '\n").is_err());
    assert!(Config::default().with_version(String::new()).is_err());
    assert!(Config::default().with_version(" ".to_string()).is_err());

    let config = Config::default().with_version("notebook-v2".to_string()).unwrap();
    assert_eq!(config.cache_version, "notebook-v2");
  }

  #[test]
  fn test_explicit_missing_path_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.yaml");
    assert!(Config::load(Some(&missing)).is_err());
  }

  #[test]
  fn test_explicit_storage_path_wins() {
    let config = Config::from_yaml("storage:\n  path: /tmp/shell.db\n").unwrap();
    assert_eq!(
      config.database_path().unwrap(),
      PathBuf::from("/tmp/shell.db")
    );
  }
}
