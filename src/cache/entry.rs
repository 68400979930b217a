//! Cache keys, stored response snapshots and response provenance.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::net::{Request, Response};

/// Normalized request descriptor: uppercase method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.as_str().to_uppercase(),
      url: url.into(),
    }
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(&request.method, &request.url)
  }

  /// Key for a GET of `url`.
  pub fn get(url: &Url) -> Self {
    Self::new(&Method::GET, url)
  }

  /// Rebuild a key from its stored columns.
  pub fn from_parts(method: String, url: String) -> Self {
    Self { method, url }
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET.as_str()
  }

  /// SHA256 of the key for stable, fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// Snapshot of a response as persisted in a generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
  pub status: u16,
  /// Header pairs in original order. Values that are not valid UTF-8 are dropped.
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl From<Response> for StoredResponse {
  fn from(response: Response) -> Self {
    let (status, headers, body) = response.into_parts();
    let headers = headers
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    Self {
      status: status.as_u16(),
      headers,
      body: body.to_vec(),
    }
  }
}

impl StoredResponse {
  /// Rebuild a response that can be handed to a caller.
  pub fn into_response(self) -> Result<Response> {
    let status = StatusCode::from_u16(self.status)
      .map_err(|e| eyre!("Invalid stored status {}: {}", self.status, e))?;

    let mut headers = HeaderMap::new();
    for (name, value) in &self.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| eyre!("Invalid stored header name {}: {}", name, e))?;
      let value = HeaderValue::from_str(value)
        .map_err(|e| eyre!("Invalid stored header value for {}: {}", name, e))?;
      headers.append(name, value);
    }

    Ok(Response::new(status, headers, self.body))
  }
}

/// A stored response together with where and when it was stored.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub generation: String,
  pub response: StoredResponse,
  pub cached_at: DateTime<Utc>,
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh response from the network
  Network,
  /// Stored response from one of the generations
  Cache,
  /// Network failed for a document; serving the offline document
  OfflineDocument,
  /// Network failed for an image; serving the placeholder graphic
  Placeholder,
  /// Network failed and nothing better was available
  NetworkError,
}

impl fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::OfflineDocument => "offline-document",
      Self::Placeholder => "placeholder",
      Self::NetworkError => "network-error",
    };
    f.pad(label)
  }
}
