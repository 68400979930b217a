//! The offline cache controller: one version of the site's caching logic.

use color_eyre::{eyre::eyre, Report, Result};
use futures::future::try_join_all;
use reqwest::StatusCode;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};
use url::Url;

use super::policy::{self, InterceptPolicy, Strategy};
use crate::cache::{CacheLayer, CacheStorage, GenerationNames, RequestKey, ResponseSource};
use crate::net::{Network, Request, Response};

/// Everything one controller version needs to know, fixed at construction.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
  /// The page's own origin
  pub origin: Url,
  pub generations: GenerationNames,
  /// Assets that must all be in the shell generation after install
  pub manifest: Vec<Url>,
  /// Cross-origin hosts whose GETs are intercepted (font/style CDNs)
  pub trusted_origins: Vec<Url>,
  /// Served for documents when offline and nothing better is cached
  pub offline_document: Url,
  /// Activate immediately after a successful install
  pub skip_waiting: bool,
}

impl ControllerConfig {
  pub fn new(origin: Url, prefix: &str, version: u32) -> Self {
    let mut offline_document = origin.clone();
    offline_document.set_path("/index.html");
    offline_document.set_query(None);
    offline_document.set_fragment(None);

    Self {
      origin,
      generations: GenerationNames::new(prefix, version),
      manifest: Vec::new(),
      trusted_origins: Vec::new(),
      offline_document,
      skip_waiting: false,
    }
  }

  pub fn with_manifest(mut self, manifest: Vec<Url>) -> Self {
    self.manifest = manifest;
    self
  }

  pub fn with_trusted_origins(mut self, trusted_origins: Vec<Url>) -> Self {
    self.trusted_origins = trusted_origins;
    self
  }

  pub fn with_offline_document(mut self, offline_document: Url) -> Self {
    self.offline_document = offline_document;
    self
  }

  pub fn with_skip_waiting(mut self, skip_waiting: bool) -> Self {
    self.skip_waiting = skip_waiting;
    self
  }

  /// The same configuration under another cache version.
  pub fn with_version(&self, version: u32) -> Self {
    Self {
      generations: GenerationNames::new(&self.generations.prefix, version),
      ..self.clone()
    }
  }
}

/// Lifecycle of one controller version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Constructed, install not attempted yet
  Parsed,
  Installing,
  /// Shell stored; waiting for activation
  Installed,
  Active,
  /// Failed install, or superseded by a newer version
  Redundant,
}

impl WorkerState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Active => "active",
      Self::Redundant => "redundant",
    }
  }
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for WorkerState {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "parsed" => Ok(Self::Parsed),
      "installing" => Ok(Self::Installing),
      "installed" => Ok(Self::Installed),
      "active" => Ok(Self::Active),
      "redundant" => Ok(Self::Redundant),
      other => Err(eyre!("Unknown lifecycle state '{}'", other)),
    }
  }
}

/// What the controller decided for one intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
  /// The controller did not intervene; the caller performs the request itself
  PassThrough(Request),
  Respond {
    response: Response,
    source: ResponseSource,
  },
}

impl FetchOutcome {
  fn respond(response: Response, source: ResponseSource) -> Self {
    Self::Respond { response, source }
  }

  pub fn source(&self) -> Option<ResponseSource> {
    match self {
      Self::PassThrough(_) => None,
      Self::Respond { source, .. } => Some(*source),
    }
  }
}

/// Only plain 200 responses are written to a generation at runtime.
fn is_cacheable(status: StatusCode) -> bool {
  status == StatusCode::OK
}

/// One version of the offline caching logic.
///
/// Lifecycle steps take `&mut self`; request handling takes `&self` so any
/// number of requests can be in flight at once. The only state they share is
/// the cache storage.
pub struct OfflineCacheController<S: CacheStorage, N: Network> {
  config: ControllerConfig,
  policy: InterceptPolicy,
  cache: CacheLayer<S>,
  network: N,
  state: WorkerState,
}

impl<S: CacheStorage, N: Network> OfflineCacheController<S, N> {
  pub fn new(config: ControllerConfig, cache: CacheLayer<S>, network: N) -> Self {
    Self::with_state(config, cache, network, WorkerState::Parsed)
  }

  /// Rebuild a controller whose lifecycle was recorded earlier.
  pub(crate) fn with_state(
    config: ControllerConfig,
    cache: CacheLayer<S>,
    network: N,
    state: WorkerState,
  ) -> Self {
    let policy = InterceptPolicy::new(&config.origin, &config.trusted_origins);
    Self {
      config,
      policy,
      cache,
      network,
      state,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn config(&self) -> &ControllerConfig {
    &self.config
  }

  pub fn version(&self) -> u32 {
    self.config.generations.version()
  }

  fn shell_name(&self) -> &str {
    self.config.generations.shell.name()
  }

  fn transition(&mut self, state: WorkerState) {
    debug!(generation = %self.shell_name(), from = %self.state, to = %state, "Lifecycle transition");
    self.state = state;
    self.cache.record_state(self.shell_name(), state.as_str());
  }

  /// Fetch every manifest asset and store them into the shell generation.
  ///
  /// All-or-nothing: if any fetch fails or answers with a non-success status,
  /// nothing is stored and this version becomes redundant.
  pub async fn install(&mut self) -> Result<()> {
    if !matches!(self.state, WorkerState::Parsed | WorkerState::Redundant) {
      return Err(eyre!("Cannot install {} while {}", self.shell_name(), self.state));
    }

    self.transition(WorkerState::Installing);
    let shell = self.shell_name().to_string();
    info!(generation = %shell, assets = self.config.manifest.len(), "Caching app shell and assets");

    let fetched = try_join_all(self.config.manifest.iter().map(|url| self.fetch_asset(url))).await;
    let stored = fetched.and_then(|entries| self.cache.store_batch(&shell, entries));

    if let Err(e) = stored {
      warn!(generation = %shell, error = %e, "Install failed");
      self.transition(WorkerState::Redundant);
      return Err(e.wrap_err(format!("Failed to install {}", shell)));
    }

    self.transition(WorkerState::Installed);
    Ok(())
  }

  async fn fetch_asset(&self, url: &Url) -> Result<(RequestKey, Response)> {
    let request = Request::get(url.clone());
    let response = self.network.fetch(&request).await?;

    if !response.status().is_success() {
      return Err(eyre!(
        "Failed to cache {}: server answered {}",
        url,
        response.status()
      ));
    }

    Ok((RequestKey::for_request(&request), response))
  }

  /// Take over from older versions: delete every generation that is not one
  /// of this version's two, then start serving.
  ///
  /// Returns the deleted generation names.
  pub fn activate(&mut self) -> Result<Vec<String>> {
    if self.state != WorkerState::Installed {
      return Err(eyre!("Cannot activate {} while {}", self.shell_name(), self.state));
    }

    let generations = &self.config.generations;
    let deleted = self
      .cache
      .retain_generations(|name| generations.is_current(name))?;

    self.transition(WorkerState::Active);
    info!(generation = %self.shell_name(), deleted = deleted.len(), "Controller activated, claiming clients");
    Ok(deleted)
  }

  /// Mark this version as superseded.
  pub fn retire(&mut self) {
    self.transition(WorkerState::Redundant);
  }

  /// Decide how to answer one request.
  ///
  /// Only an active controller intervenes.
  pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
    if self.state != WorkerState::Active {
      return FetchOutcome::PassThrough(request);
    }

    match self.policy.strategy_for(&request) {
      Strategy::PassThrough => FetchOutcome::PassThrough(request),
      Strategy::NetworkFirst => self.network_first(request).await,
      Strategy::CacheFirst => self.cache_first(request).await,
    }
  }

  /// Documents: latest from the network when online, last stored copy (or the
  /// offline document) when not.
  async fn network_first(&self, request: Request) -> FetchOutcome {
    let key = RequestKey::for_request(&request);

    match self.network.fetch(&request).await {
      Ok(response) => {
        let response = if is_cacheable(response.status()) {
          let (response, copy) = response.tee();
          self.cache.store(self.shell_name(), &key, copy);
          response
        } else {
          response
        };
        FetchOutcome::respond(response, ResponseSource::Network)
      }
      Err(e) => {
        debug!(%key, error = %e, "Network failed for document, falling back to cache");

        if let Some(cached) = self.cache.lookup(&key) {
          return FetchOutcome::respond(cached, ResponseSource::Cache);
        }

        let offline = RequestKey::get(&self.config.offline_document);
        match self.cache.lookup(&offline) {
          Some(document) => FetchOutcome::respond(document, ResponseSource::OfflineDocument),
          None => {
            warn!(%key, "No cached page and no offline document");
            FetchOutcome::respond(policy::network_error(), ResponseSource::NetworkError)
          }
        }
      }
    }
  }

  /// Everything else: stored copy if any, otherwise the network, storing
  /// successful answers into the dynamic generation.
  async fn cache_first(&self, request: Request) -> FetchOutcome {
    let key = RequestKey::for_request(&request);

    if let Some(cached) = self.cache.lookup(&key) {
      return FetchOutcome::respond(cached, ResponseSource::Cache);
    }

    match self.network.fetch(&request).await {
      Ok(response) if !is_cacheable(response.status()) => {
        debug!(%key, status = %response.status(), "Not caching unsuccessful response");
        FetchOutcome::respond(response, ResponseSource::Network)
      }
      Ok(response) => {
        let (response, copy) = response.tee();
        self
          .cache
          .store(self.config.generations.dynamic.name(), &key, copy);
        FetchOutcome::respond(response, ResponseSource::Network)
      }
      Err(e) => {
        warn!(%key, error = %e, "Fetch failed");
        if policy::is_image_url(&request.url) {
          FetchOutcome::respond(policy::offline_image(), ResponseSource::Placeholder)
        } else {
          FetchOutcome::respond(policy::network_error(), ResponseSource::NetworkError)
        }
      }
    }
  }
}
