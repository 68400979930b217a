//! Cache layer that turns storage failures into misses on the request path.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::entry::{RequestKey, StoredResponse};
use super::storage::CacheStorage;
use crate::net::Response;

/// Cache layer shared by every controller version of a registration.
///
/// Reads and single writes on the request path never fail: a storage error
/// is logged and treated as a miss (or a skipped write). Lifecycle
/// operations (install batch, eviction) propagate their errors.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Find a stored response for `key` in any generation.
  pub fn lookup(&self, key: &RequestKey) -> Option<Response> {
    let entry = match self.storage.match_any(key) {
      Ok(Some(entry)) => entry,
      Ok(None) => return None,
      Err(e) => {
        warn!(%key, error = %e, "Cache read failed, treating as miss");
        return None;
      }
    };

    debug!(%key, generation = %entry.generation, cached_at = %entry.cached_at, "Cache hit");
    match entry.response.into_response() {
      Ok(response) => Some(response),
      Err(e) => {
        warn!(%key, error = %e, "Stored response unreadable, treating as miss");
        None
      }
    }
  }

  /// Persist `response` into `generation`, replacing any existing entry.
  ///
  /// Returns whether the write happened. Only GET keys are ever stored.
  pub fn store(&self, generation: &str, key: &RequestKey, response: Response) -> bool {
    if !key.is_get() {
      warn!(%key, "Refusing to cache a non-GET request");
      return false;
    }

    let stored = StoredResponse::from(response);
    match self.storage.put(generation, key, &stored) {
      Ok(()) => {
        debug!(%key, generation, "Cached response");
        true
      }
      Err(e) => {
        warn!(%key, generation, error = %e, "Cache write failed");
        false
      }
    }
  }

  /// Persist a whole batch into `generation` atomically.
  pub fn store_batch(&self, generation: &str, entries: Vec<(RequestKey, Response)>) -> Result<()> {
    if let Some((key, _)) = entries.iter().find(|(key, _)| !key.is_get()) {
      return Err(eyre!("Cannot cache non-GET request {}", key));
    }

    let entries: Vec<(RequestKey, StoredResponse)> = entries
      .into_iter()
      .map(|(key, response)| (key, StoredResponse::from(response)))
      .collect();

    self.storage.put_all(generation, &entries)?;
    info!(generation, count = entries.len(), "Stored generation batch");
    Ok(())
  }

  /// Delete every generation for which `keep` returns false.
  ///
  /// Returns the names that were deleted.
  pub fn retain_generations<F>(&self, keep: F) -> Result<Vec<String>>
  where
    F: Fn(&str) -> bool,
  {
    let mut deleted = Vec::new();
    for name in self.storage.generations()? {
      if keep(&name) {
        continue;
      }
      info!(generation = %name, "Deleting old cache");
      if self.storage.delete_generation(&name)? {
        deleted.push(name);
      }
    }
    Ok(deleted)
  }

  /// Record a lifecycle state; failures are logged only.
  pub fn record_state(&self, generation: &str, state: &str) {
    if let Err(e) = self.storage.record_lifecycle(generation, state) {
      warn!(generation, state, error = %e, "Failed to record lifecycle state");
    }
  }

  /// Recorded lifecycle states, keyed by shell generation name.
  pub fn recorded_states(&self) -> Result<Vec<(String, String)>> {
    self.storage.lifecycle_states()
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
  use crate::cache::storage::{BrokenStorage, MemoryStorage};
  use reqwest::{Method, StatusCode};
  use url::Url;

  fn key(path: &str) -> RequestKey {
    RequestKey::get(&Url::parse(&format!("https://example.com{}", path)).unwrap())
  }

  fn ok(body: &str) -> Response {
    Response::with_content_type(StatusCode::OK, "text/plain", body.to_string())
  }

  #[test]
  fn test_store_then_lookup() {
    let cache = CacheLayer::new(MemoryStorage::new());
    assert!(cache.store("dynamic-v1", &key("/a.css"), ok("a")));

    let hit = cache.lookup(&key("/a.css")).unwrap();
    assert_eq!(&hit.into_body()[..], b"a");
  }

  #[test]
  fn test_store_refuses_non_get() {
    let cache = CacheLayer::new(MemoryStorage::new());
    let post = RequestKey::new(&Method::POST, &Url::parse("https://example.com/form").unwrap());

    assert!(!cache.store("dynamic-v1", &post, ok("x")));
    assert!(cache.storage().generations().unwrap().is_empty());
  }

  #[test]
  fn test_storage_errors_degrade_to_miss() {
    let cache = CacheLayer::new(BrokenStorage);
    assert!(cache.lookup(&key("/a")).is_none());
    assert!(!cache.store("dynamic-v1", &key("/a"), ok("a")));
    cache.record_state("shell-v1", "active");
  }

  #[test]
  fn test_retain_generations_reports_deleted() {
    let cache = CacheLayer::new(MemoryStorage::new());
    cache.store("keep", &key("/a"), ok("a"));
    cache.store("drop-1", &key("/b"), ok("b"));
    cache.store("drop-2", &key("/c"), ok("c"));

    let deleted = cache.retain_generations(|name| name == "keep").unwrap();
    assert_eq!(deleted, vec!["drop-1", "drop-2"]);
    assert_eq!(cache.storage().generations().unwrap(), vec!["keep"]);
  }
}
