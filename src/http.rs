//! Request and response snapshots passed between the host, the network and the cache.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, VARY};
use reqwest::{Method, StatusCode};
use url::Url;

/// Whether a request loads a new top-level document or a sub-resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level document load
  Navigate,
  /// Scripts, styles, images, API calls...
  #[default]
  SubResource,
}

/// How the network layer should treat intermediate HTTP caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
  #[default]
  Default,
  /// Bypass intermediate caches and always go to the origin
  Reload,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: HeaderMap,
  pub mode: RequestMode,
  pub cache: CacheMode,
}

impl Request {
  /// A GET request for a sub-resource.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      headers: HeaderMap::new(),
      mode: RequestMode::SubResource,
      cache: CacheMode::Default,
    }
  }

  /// A GET request for a top-level document.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_cache_mode(mut self, cache: CacheMode) -> Self {
    self.cache = cache;
    self
  }

  pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
    self.headers.insert(name, value);
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// A fully buffered response.
///
/// The body is an owned buffer, so a response can be duplicated with `clone()`
/// and handed to independent consumers (the requester and the cache store).
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Bytes,
}

impl Response {
  pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers: HeaderMap::new(),
      body: body.into(),
    }
  }

  /// A 200 response with the given body.
  pub fn ok(body: impl Into<Bytes>) -> Self {
    Self::new(StatusCode::OK, body)
  }

  pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
    self.headers.insert(name, value);
    self
  }

  /// True for 2xx statuses.
  pub fn is_ok(&self) -> bool {
    self.status.is_success()
  }

  /// Header names listed in `Vary`, lowercased. `*` is returned as-is.
  pub fn vary(&self) -> Vec<String> {
    self
      .headers
      .get_all(VARY)
      .iter()
      .filter_map(|v| v.to_str().ok())
      .flat_map(|v| v.split(','))
      .map(|name| name.trim().to_ascii_lowercase())
      .filter(|name| !name.is_empty())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_navigate_sets_mode() {
    let url = Url::parse("https://app.test/notes/1").unwrap();
    let request = Request::navigate(url.clone());
    assert!(request.is_navigation());
    assert_eq!(request.method, Method::GET);
    assert_eq!(request.url, url);
    assert!(!Request::get(url).is_navigation());
  }

  #[test]
  fn test_vary_parses_multiple_headers() {
    let response = Response::ok("x")
      .with_header(VARY, HeaderValue::from_static("Accept-Encoding, Accept-Language"));
    assert_eq!(response.vary(), vec!["accept-encoding", "accept-language"]);
  }

  #[test]
  fn test_vary_absent_is_empty() {
    assert!(Response::ok("x").vary().is_empty());
  }

  #[test]
  fn test_clone_shares_body() {
    let response = Response::ok(vec![1u8, 2, 3]);
    let copy = response.clone();
    assert_eq!(copy, response);
    assert_eq!(copy.body.as_ref(), &[1, 2, 3]);
  }
}
