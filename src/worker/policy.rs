//! Which requests the controller intercepts, and the responses it synthesizes
//! when the network is gone.

use reqwest::{Method, StatusCode};
use url::{Origin, Url};

use crate::net::{Request, Response};

/// Extensions served with the offline placeholder graphic.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "svg"];

const OFFLINE_IMAGE_SVG: &str = concat!(
  r#"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200">"#,
  r##"<rect width="200" height="200" fill="#f0f0f0"/>"##,
  r##"<text x="50%" y="50%" font-family="sans-serif" font-size="24" text-anchor="middle" dominant-baseline="middle" fill="#999">Image Offline</text>"##,
  "</svg>"
);

const NETWORK_ERROR_BODY: &str = "Network error happened";

/// How a single request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Not ours: the request goes straight to the network untouched
  PassThrough,
  /// Documents: network, then cache, then the offline document
  NetworkFirst,
  /// Everything else: cache, then network
  CacheFirst,
}

/// Origin allow-list deciding which requests are intercepted.
#[derive(Debug, Clone)]
pub struct InterceptPolicy {
  origin: Origin,
  trusted: Vec<Origin>,
}

impl InterceptPolicy {
  pub fn new(origin: &Url, trusted_origins: &[Url]) -> Self {
    Self {
      origin: origin.origin(),
      trusted: trusted_origins.iter().map(Url::origin).collect(),
    }
  }

  pub fn strategy_for(&self, request: &Request) -> Strategy {
    if request.method != Method::GET || !self.is_allowed_origin(&request.url) {
      return Strategy::PassThrough;
    }

    if request.accepts_html() {
      Strategy::NetworkFirst
    } else {
      Strategy::CacheFirst
    }
  }

  fn is_allowed_origin(&self, url: &Url) -> bool {
    let origin = url.origin();
    origin == self.origin || self.trusted.contains(&origin)
  }
}

/// Whether the URL path ends in a known image extension (case-insensitive).
pub fn is_image_url(url: &Url) -> bool {
  let path = url.path();
  let Some((_, extension)) = path.rsplit_once('.') else {
    return false;
  };
  if extension.contains('/') {
    return false;
  }
  IMAGE_EXTENSIONS
    .iter()
    .any(|known| extension.eq_ignore_ascii_case(known))
}

/// Placeholder served for images that could not be fetched.
pub fn offline_image() -> Response {
  Response::with_content_type(StatusCode::OK, "image/svg+xml", OFFLINE_IMAGE_SVG)
}

/// Generic failure for non-image requests that could not be fetched.
pub fn network_error() -> Response {
  Response::with_content_type(StatusCode::REQUEST_TIMEOUT, "text/plain", NETWORK_ERROR_BODY)
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::header::{HeaderValue, ACCEPT};

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  fn policy() -> InterceptPolicy {
    InterceptPolicy::new(
      &url("https://kelsa.example"),
      &[
        url("https://fonts.googleapis.com"),
        url("https://cdnjs.cloudflare.com"),
      ],
    )
  }

  #[test]
  fn test_same_origin_document_is_network_first() {
    let request = Request::document(url("https://kelsa.example/rentals.html"));
    assert_eq!(policy().strategy_for(&request), Strategy::NetworkFirst);
  }

  #[test]
  fn test_same_origin_asset_is_cache_first() {
    let request = Request::get(url("https://kelsa.example/css/styles.css"));
    assert_eq!(policy().strategy_for(&request), Strategy::CacheFirst);
  }

  #[test]
  fn test_trusted_cross_origin_is_intercepted() {
    let request = Request::get(url("https://fonts.googleapis.com/css2?family=Poppins"));
    assert_eq!(policy().strategy_for(&request), Strategy::CacheFirst);
  }

  #[test]
  fn test_untrusted_cross_origin_passes_through() {
    let request = Request::get(url("https://www.gstatic.com/firebasejs/app.js"));
    assert_eq!(policy().strategy_for(&request), Strategy::PassThrough);
  }

  #[test]
  fn test_origin_prefix_lookalike_passes_through() {
    let request = Request::get(url("https://kelsa.example.evil.test/steal.js"));
    assert_eq!(policy().strategy_for(&request), Strategy::PassThrough);
  }

  #[test]
  fn test_non_get_passes_through() {
    let request = Request::new(Method::POST, url("https://kelsa.example/contact"))
      .with_header(ACCEPT, HeaderValue::from_static("text/html"));
    assert_eq!(policy().strategy_for(&request), Strategy::PassThrough);
  }

  #[test]
  fn test_image_detection_uses_path_extension() {
    assert!(is_image_url(&url("https://kelsa.example/assets/images/rentals.webp")));
    assert!(is_image_url(&url("https://kelsa.example/a/photo.JPG?w=200")));
    assert!(is_image_url(&url("https://kelsa.example/logo.svg")));
    assert!(!is_image_url(&url("https://kelsa.example/css/styles.css")));
    assert!(!is_image_url(&url("https://kelsa.example/images.png/list")));
    assert!(!is_image_url(&url("https://kelsa.example/")));
  }

  #[test]
  fn test_synthesized_responses() {
    let image = offline_image();
    assert_eq!(image.status(), StatusCode::OK);
    assert_eq!(image.content_type(), Some("image/svg+xml"));
    assert!(String::from_utf8_lossy(&image.into_body()).contains("Image Offline"));

    let error = network_error();
    assert_eq!(error.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(error.content_type(), Some("text/plain"));
    assert_eq!(&error.into_body()[..], NETWORK_ERROR_BODY.as_bytes());
  }
}
