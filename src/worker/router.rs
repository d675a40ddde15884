//! Per-request strategy selection.

use color_eyre::{eyre::eyre, Report, Result};
use reqwest::Method;
use tracing::{debug, warn};
use url::Origin;

use super::Interceptor;
use crate::cache::{CacheResult, CacheStorage};
use crate::http::{Request, Response};
use crate::network::Network;

/// How a request is handled, derived fresh for every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Top-level document load: network first, app shell when offline
  Navigation,
  /// Sub-resource from our own origin: cache first
  SameOrigin,
  /// Anything else: network first, cached copy when offline
  CrossOrigin,
}

impl RequestClass {
  pub fn classify(request: &Request, origin: &Origin) -> Self {
    if request.is_navigation() {
      Self::Navigation
    } else if request.url.origin() == *origin {
      Self::SameOrigin
    } else {
      Self::CrossOrigin
    }
  }
}

/// Result of a fetch event.
#[derive(Debug)]
pub enum FetchOutcome {
  /// Not intercepted; the host performs the request itself.
  PassThrough,
  Responded(CacheResult<Response>),
  /// Intercepted, but neither network nor cache could answer.
  Failed(Report),
}

impl<S: CacheStorage, N: Network + 'static> Interceptor<S, N> {
  pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
    // Only GET responses are ever stored
    if request.method != Method::GET {
      debug!(method = %request.method, url = %request.url, "Passing through");
      return FetchOutcome::PassThrough;
    }

    let class = RequestClass::classify(&request, &self.manifest.origin());
    debug!(url = %request.url, ?class, "Routing");

    let result = match class {
      RequestClass::Navigation => self.network_first_with_shell(request).await,
      RequestClass::SameOrigin => self.cache_first(request).await,
      RequestClass::CrossOrigin => self.network_first(request).await,
    };

    match result {
      Ok(routed) => FetchOutcome::Responded(routed),
      Err(e) => FetchOutcome::Failed(e),
    }
  }

  /// Live navigation with a background cache refresh; app shell when offline.
  async fn network_first_with_shell(&self, request: Request) -> Result<CacheResult<Response>> {
    match self.network.fetch(&request).await {
      Ok(response) => {
        self.spawn_cache_write(request, response.clone());
        Ok(CacheResult::from_network(response))
      }
      Err(err) => {
        debug!(url = %request.url, error = %err, "Navigation offline, serving app shell");
        let shell = Request::get(self.manifest.fallback.clone());
        match self.lookup(&shell).await? {
          Some(entry) => Ok(CacheResult::fallback(entry.response, entry.cached_at)),
          None => Err(eyre!(
            "Navigation to {} failed and {} is not cached: {}",
            request.url,
            self.manifest.fallback,
            err
          )),
        }
      }
    }
  }

  /// Cached copy if present, otherwise network with backfill.
  async fn cache_first(&self, request: Request) -> Result<CacheResult<Response>> {
    let cached = self.lookup(&request).await.unwrap_or_else(|e| {
      warn!(url = %request.url, error = %e, "Cache lookup failed");
      None
    });
    if let Some(entry) = cached {
      return Ok(CacheResult::from_cache(entry.response, entry.cached_at));
    }

    let response = self.network.fetch(&request).await?;
    self.spawn_cache_write(request, response.clone());
    Ok(CacheResult::from_network(response))
  }

  /// Network verbatim and uncached; cached copy only when the network fails.
  async fn network_first(&self, request: Request) -> Result<CacheResult<Response>> {
    match self.network.fetch(&request).await {
      Ok(response) => Ok(CacheResult::from_network(response)),
      Err(err) => match self.lookup(&request).await? {
        Some(entry) => Ok(CacheResult::offline(entry.response, entry.cached_at)),
        None => Err(err),
      },
    }
  }
}
