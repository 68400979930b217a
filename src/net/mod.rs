//! Network seam used by the offline controller.

mod client;
mod types;

pub use client::{HttpNetwork, Network};
pub use types::{Request, Response};

#[cfg(test)]
pub mod testing {
  //! Scripted network for controller tests.

  use color_eyre::{eyre::eyre, Result};
  use reqwest::StatusCode;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;

  use super::{Network, Request, Response};

  #[derive(Clone)]
  enum Route {
    Respond {
      status: StatusCode,
      content_type: &'static str,
      body: Vec<u8>,
    },
    Fail,
  }

  /// Network double that answers from a fixed route table and counts calls.
  ///
  /// Unknown URLs fail as if the host were unreachable.
  #[derive(Default)]
  pub struct FakeNetwork {
    routes: Mutex<HashMap<String, Route>>,
    offline: AtomicBool,
    calls: AtomicUsize,
  }

  impl FakeNetwork {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn respond(
      self,
      url: &str,
      status: StatusCode,
      content_type: &'static str,
      body: &str,
    ) -> Self {
      self.set_route(
        url,
        Route::Respond {
          status,
          content_type,
          body: body.as_bytes().to_vec(),
        },
      );
      self
    }

    pub fn ok(self, url: &str, content_type: &'static str, body: &str) -> Self {
      self.respond(url, StatusCode::OK, content_type, body)
    }

    pub fn fail(self, url: &str) -> Self {
      self.set_route(url, Route::Fail);
      self
    }

    pub fn set_offline(&self, offline: bool) {
      self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }

    fn set_route(&self, url: &str, route: Route) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(url.to_string(), route);
    }
  }

  impl Network for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      tokio::task::yield_now().await;

      if self.offline.load(Ordering::SeqCst) {
        return Err(eyre!("Failed to fetch {}: offline", request.url));
      }

      let route = self
        .routes
        .lock()
        .unwrap()
        .get(request.url.as_str())
        .cloned();

      match route {
        Some(Route::Respond {
          status,
          content_type,
          body,
        }) => Ok(Response::with_content_type(status, content_type, body)),
        Some(Route::Fail) | None => Err(eyre!("Failed to fetch {}: unreachable", request.url)),
      }
    }
  }
}
