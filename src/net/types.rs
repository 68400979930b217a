//! Request and response values that travel between pages, the controller and the network.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use url::Url;

/// An outbound request issued by a page.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: HeaderMap,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: HeaderMap::new(),
    }
  }

  /// Plain GET with no headers, as issued for manifest assets.
  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// GET that declares it wants an HTML document.
  pub fn document(url: Url) -> Self {
    Self::get(url).with_header(
      ACCEPT,
      HeaderValue::from_static("text/html,application/xhtml+xml"),
    )
  }

  pub fn with_header(mut self, name: reqwest::header::HeaderName, value: HeaderValue) -> Self {
    self.headers.append(name, value);
    self
  }

  /// Whether any Accept header mentions `text/html`.
  ///
  /// A request without an Accept header is treated as a non-document request.
  pub fn accepts_html(&self) -> bool {
    self
      .headers
      .get_all(ACCEPT)
      .iter()
      .filter_map(|v| v.to_str().ok())
      .any(|v| v.contains("text/html"))
  }
}

/// A response whose body can be read exactly once.
///
/// `Response` is not `Clone`. Code that must both
/// return a response and persist it calls [`Response::tee`] first, which
/// consumes the original and yields two independently owned copies.
#[derive(Debug)]
pub struct Response {
  status: StatusCode,
  headers: HeaderMap,
  body: Bytes,
}

impl Response {
  pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers,
      body: body.into(),
    }
  }

  /// Response with a single Content-Type header.
  pub fn with_content_type(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
  ) -> Self {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    Self::new(status, headers, body)
  }

  pub fn status(&self) -> StatusCode {
    self.status
  }

  pub fn headers(&self) -> &HeaderMap {
    &self.headers
  }

  pub fn content_type(&self) -> Option<&str> {
    self
      .headers
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
  }

  pub fn body_len(&self) -> usize {
    self.body.len()
  }

  /// Split into two owned copies: one for the caller, one for storage.
  pub fn tee(self) -> (Response, Response) {
    let copy = Response {
      status: self.status,
      headers: self.headers.clone(),
      body: self.body.clone(),
    };
    (self, copy)
  }

  /// Consume the response and take its body.
  pub fn into_body(self) -> Bytes {
    self.body
  }

  /// Consume the response into its parts.
  pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
    (self.status, self.headers, self.body)
  }
}
