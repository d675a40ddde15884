//! Stored request/response pairs and the rules for matching them.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName};
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};
use url::Url;

use crate::http::{Request, Response};

/// One cached response together with what is needed to match it again.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  /// Request URL without fragment
  pub url: Url,
  /// Request headers named by the response's `Vary`
  pub request_headers: HeaderMap,
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Snapshot a request/response pair for storage.
  ///
  /// Fails for requests and responses a cache store must not hold.
  pub fn new(request: &Request, response: Response) -> Result<Self> {
    if request.method != Method::GET {
      return Err(eyre!(
        "Cannot cache {} request to {}",
        request.method,
        request.url
      ));
    }
    if response.status == StatusCode::PARTIAL_CONTENT {
      return Err(eyre!("Cannot cache partial response for {}", request.url));
    }

    let vary = response.vary();
    if vary.iter().any(|name| name == "*") {
      return Err(eyre!("Cannot cache response for {} with Vary: *", request.url));
    }

    let mut request_headers = HeaderMap::new();
    for name in &vary {
      let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
        continue;
      };
      for value in request.headers.get_all(&name) {
        request_headers.append(name.clone(), value.clone());
      }
    }

    Ok(Self {
      url: match_url(&request.url),
      request_headers,
      response,
      cached_at: Utc::now(),
    })
  }

  /// Exact match on method, URL and every header the response varies on.
  pub fn matches(&self, request: &Request) -> bool {
    if request.method != Method::GET || self.url != match_url(&request.url) {
      return false;
    }

    self.response.vary().iter().all(|name| {
      let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
        return false;
      };
      let stored: Vec<_> = self.request_headers.get_all(&name).iter().collect();
      let incoming: Vec<_> = request.headers.get_all(&name).iter().collect();
      stored == incoming
    })
  }

  /// Stable storage key for this entry's request identity.
  pub fn key(&self) -> String {
    entry_key(&self.url)
  }
}

/// Fragments never reach the server, so they are not part of a request's identity.
pub fn match_url(url: &Url) -> Url {
  let mut url = url.clone();
  url.set_fragment(None);
  url
}

/// SHA256 of the request identity, for fixed-length storage keys.
pub fn entry_key(url: &Url) -> String {
  let mut hasher = Sha256::new();
  hasher.update(b"GET ");
  hasher.update(match_url(url).as_str().as_bytes());
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::header::{HeaderValue, ACCEPT_LANGUAGE, VARY};

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_matches_same_url_ignoring_fragment() {
    let entry = CacheEntry::new(
      &Request::get(url("https://app.test/or_notebook.html")),
      Response::ok("shell"),
    )
    .unwrap();

    assert!(entry.matches(&Request::get(url("https://app.test/or_notebook.html#cell-3"))));
    assert!(!entry.matches(&Request::get(url("https://app.test/or_notebook.html?v=2"))));
    assert!(!entry.matches(&Request::get(url("https://app.test/or_notebook"))));
  }

  #[test]
  fn test_rejects_non_get_and_partial() {
    let post = Request::get(url("https://app.test/api")).with_method(Method::POST);
    assert!(CacheEntry::new(&post, Response::ok("x")).is_err());

    let get = Request::get(url("https://app.test/video"));
    let partial = Response::new(StatusCode::PARTIAL_CONTENT, "x");
    assert!(CacheEntry::new(&get, partial).is_err());
  }

  #[test]
  fn test_rejects_vary_star() {
    let get = Request::get(url("https://app.test/feed"));
    let response = Response::ok("x").with_header(VARY, HeaderValue::from_static("*"));
    assert!(CacheEntry::new(&get, response).is_err());
  }

  #[test]
  fn test_vary_header_must_match() {
    let english = Request::get(url("https://app.test/strings.json"))
      .with_header(ACCEPT_LANGUAGE, HeaderValue::from_static("en"));
    let german = Request::get(url("https://app.test/strings.json"))
      .with_header(ACCEPT_LANGUAGE, HeaderValue::from_static("de"));
    let response = Response::ok("{}").with_header(VARY, HeaderValue::from_static("Accept-Language"));

    let entry = CacheEntry::new(&english, response).unwrap();
    assert!(entry.matches(&english));
    assert!(!entry.matches(&german));
    assert!(!entry.matches(&Request::get(url("https://app.test/strings.json"))));
  }

  #[test]
  fn test_entry_key_ignores_fragment() {
    assert_eq!(
      entry_key(&url("https://app.test/a#x")),
      entry_key(&url("https://app.test/a"))
    );
    assert_ne!(
      entry_key(&url("https://app.test/a")),
      entry_key(&url("https://app.test/b"))
    );
    assert_eq!(entry_key(&url("https://app.test/a")).len(), 64);
  }
}
