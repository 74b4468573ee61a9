//! Cache layer that orchestrates caching strategies with network fetching.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::CacheStorage;
use super::traits::CacheResult;
use crate::http::{RequestKey, Response};

/// Cache layer that manages caching strategies and network fetching.
///
/// The fetcher passed to each strategy performs the network call; only
/// successful (2xx) responses are written back.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer over the given storage backend.
  pub fn new(storage: Arc<S>) -> Self {
    Self { storage }
  }

  #[cfg(test)]
  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Serve from the namespace when present; only go to the network on a miss.
  ///
  /// 1. Check cache - if present, return without a network call
  /// 2. Fetch from network, propagating transport errors
  /// 3. Store a successful response before returning it
  ///
  /// A storage failure on lookup counts as a miss, and one on store only
  /// costs the copy.
  pub async fn cache_first<F, Fut>(
    &self,
    namespace: &str,
    key: &RequestKey,
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    match self.storage.match_entry(namespace, key) {
      Ok(Some(cached)) => {
        debug!(%key, namespace, "cache hit");
        return Ok(CacheResult::from_cache(cached.response, cached.cached_at));
      }
      Ok(None) => {}
      Err(err) => warn!(%key, namespace, error = %err, "cache lookup failed, treating as miss"),
    }

    let response = fetcher().await?;
    self.store(namespace, key, &response);
    Ok(CacheResult::from_network(response))
  }

  /// Try the network first and keep the namespace current.
  ///
  /// 1. Fetch from network; store a successful response
  /// 2. On a transport failure, return the stored copy (offline mode)
  /// 3. With no readable stored copy, propagate the transport failure
  pub async fn network_first<F, Fut>(
    &self,
    namespace: &str,
    key: &RequestKey,
    fetcher: F,
  ) -> Result<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    let err = match fetcher().await {
      Ok(response) => {
        self.store(namespace, key, &response);
        return Ok(CacheResult::from_network(response));
      }
      Err(err) => err,
    };

    match self.storage.match_entry(namespace, key) {
      Ok(Some(cached)) => {
        debug!(%key, namespace, error = %err, "network failed, serving stored copy");
        Ok(CacheResult::offline(cached.response, cached.cached_at))
      }
      Ok(None) => Err(err),
      Err(lookup_err) => {
        warn!(%key, namespace, error = %lookup_err, "cache lookup failed after network failure");
        Err(err)
      }
    }
  }

  /// Write back a successful response. Failures are logged and swallowed.
  fn store(&self, namespace: &str, key: &RequestKey, response: &Response) {
    if !response.is_success() {
      return;
    }
    if let Err(err) = self.storage.put_entry(namespace, key, response) {
      warn!(%key, namespace, error = %err, "failed to store response");
    }
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::failing::FailingStorage;
  use crate::cache::traits::CacheSource;
  use crate::cache::SqliteStorage;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicU32, Ordering};
  use url::Url;

  fn layer() -> CacheLayer<SqliteStorage> {
    CacheLayer::new(Arc::new(SqliteStorage::in_memory().unwrap()))
  }

  fn key(path: &str) -> RequestKey {
    RequestKey::new("GET", &Url::parse("https://site.test").unwrap().join(path).unwrap())
  }

  #[tokio::test]
  async fn test_cache_first_hit_skips_network() {
    let layer = layer();
    let counter = AtomicU32::new(0);
    let calls = &counter;
    layer
      .storage()
      .put_entry("static", &key("/app.js"), &Response::new(200, "cached"))
      .unwrap();

    let result = layer
      .cache_first("static", &key("/app.js"), || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(200, "network"))
      })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.body, b"cached");
    assert_eq!(counter.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_cache_first_miss_stores_success() {
    let layer = layer();

    let result = layer
      .cache_first("static", &key("/app.js"), || async { Ok(Response::new(200, "fresh")) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    let stored = layer.storage().match_entry("static", &key("/app.js")).unwrap();
    assert_eq!(stored.unwrap().response.body, b"fresh");
  }

  #[tokio::test]
  async fn test_cache_first_does_not_store_errors() {
    let layer = layer();

    let result = layer
      .cache_first("static", &key("/missing.js"), || async { Ok(Response::new(404, "")) })
      .await
      .unwrap();

    assert_eq!(result.data.status, 404);
    assert!(layer.storage().match_entry("static", &key("/missing.js")).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_cache_first_miss_propagates_network_error() {
    let layer = layer();

    let result = layer
      .cache_first("static", &key("/app.js"), || async { Err(eyre!("offline")) })
      .await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_network_first_overwrites_on_success() {
    let layer = layer();
    layer
      .storage()
      .put_entry("dynamic", &key("/api/products"), &Response::new(200, "old"))
      .unwrap();

    let result = layer
      .network_first("dynamic", &key("/api/products"), || async {
        Ok(Response::new(200, "new"))
      })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    let stored = layer.storage().match_entry("dynamic", &key("/api/products")).unwrap();
    assert_eq!(stored.unwrap().response.body, b"new");
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_stored_copy() {
    let layer = layer();
    layer
      .storage()
      .put_entry("dynamic", &key("/api/products"), &Response::new(200, "old"))
      .unwrap();

    let result = layer
      .network_first("dynamic", &key("/api/products"), || async { Err(eyre!("offline")) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data.status, 200);
    assert_eq!(result.data.body, b"old");
  }

  #[tokio::test]
  async fn test_network_first_without_copy_propagates() {
    let layer = layer();

    let result = layer
      .network_first("dynamic", &key("/api/products"), || async { Err(eyre!("offline")) })
      .await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_network_first_returns_server_errors_uncached() {
    let layer = layer();

    let result = layer
      .network_first("dynamic", &key("/api/products"), || async {
        Ok(Response::new(500, "boom"))
      })
      .await
      .unwrap();

    assert_eq!(result.data.status, 500);
    assert_eq!(layer.storage().entry_count("dynamic").unwrap(), 0);
  }

  fn broken_layer() -> CacheLayer<FailingStorage> {
    let storage = FailingStorage::new();
    storage.break_cache();
    CacheLayer::new(Arc::new(storage))
  }

  #[tokio::test]
  async fn test_network_first_returns_response_when_store_fails() {
    let layer = broken_layer();

    let result = layer
      .network_first("dynamic", &key("/api/products"), || async {
        Ok(Response::new(200, "fresh"))
      })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.body, b"fresh");
  }

  #[tokio::test]
  async fn test_network_first_unreadable_store_propagates_network_error() {
    let layer = broken_layer();

    let result = layer
      .network_first("dynamic", &key("/api/products"), || async { Err(eyre!("offline")) })
      .await;

    assert_eq!(result.unwrap_err().to_string(), "offline");
  }

  #[tokio::test]
  async fn test_cache_first_lookup_failure_goes_to_network() {
    let layer = broken_layer();
    let counter = AtomicU32::new(0);
    let calls = &counter;

    let result = layer
      .cache_first("static", &key("/app.js"), || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new(200, "network"))
      })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.body, b"network");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }
}
