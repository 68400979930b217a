//! Active and waiting controller versions for one site.

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};

use super::controller::{ControllerConfig, FetchOutcome, OfflineCacheController, WorkerState};
use crate::cache::{CacheGeneration, CacheLayer, CacheStorage, GenerationKind};
use crate::net::{Network, Request};

/// Tracks which controller version serves requests and which one waits.
///
/// A failed install never disturbs the active version: it keeps serving from
/// its own generations until a newer version installs and is activated.
pub struct Registration<S: CacheStorage, N: Network + Clone> {
  config: ControllerConfig,
  cache: CacheLayer<S>,
  network: N,
  active: Option<OfflineCacheController<S, N>>,
  waiting: Option<OfflineCacheController<S, N>>,
}

impl<S: CacheStorage, N: Network + Clone> Registration<S, N> {
  /// Empty registration for the configured version.
  pub fn new(config: ControllerConfig, cache: CacheLayer<S>, network: N) -> Self {
    Self {
      config,
      cache,
      network,
      active: None,
      waiting: None,
    }
  }

  /// Rebuild the registration from lifecycle states recorded in storage.
  ///
  /// The highest recorded active version becomes active. The configured
  /// version becomes waiting if it was installed but never activated.
  pub fn restore(config: ControllerConfig, cache: CacheLayer<S>, network: N) -> Result<Self> {
    let prefix = config.generations.prefix.clone();
    let configured = config.generations.version();
    let mut active_version: Option<u32> = None;
    let mut configured_waiting = false;

    for (name, state) in cache.recorded_states()? {
      let Some(generation) = CacheGeneration::parse(&prefix, &name) else {
        continue;
      };
      if generation.kind() != GenerationKind::Shell {
        continue;
      }

      match state.parse::<WorkerState>() {
        Ok(WorkerState::Active) => active_version = active_version.max(Some(generation.version())),
        Ok(WorkerState::Installed) if generation.version() == configured => configured_waiting = true,
        Ok(_) => {}
        Err(e) => warn!(generation = %name, error = %e, "Ignoring unreadable lifecycle state"),
      }
    }

    let mut registration = Self::new(config, cache, network);

    if let Some(version) = active_version {
      info!(version, "Restored active version");
      registration.active = Some(OfflineCacheController::with_state(
        registration.config.with_version(version),
        registration.cache.clone(),
        registration.network.clone(),
        WorkerState::Active,
      ));
    }

    if configured_waiting && active_version.map_or(true, |active| configured > active) {
      info!(version = configured, "Restored waiting version");
      registration.waiting = Some(OfflineCacheController::with_state(
        registration.config.clone(),
        registration.cache.clone(),
        registration.network.clone(),
        WorkerState::Installed,
      ));
    }

    Ok(registration)
  }

  pub fn config(&self) -> &ControllerConfig {
    &self.config
  }

  pub fn active(&self) -> Option<&OfflineCacheController<S, N>> {
    self.active.as_ref()
  }

  pub fn waiting(&self) -> Option<&OfflineCacheController<S, N>> {
    self.waiting.as_ref()
  }

  /// Install the configured version.
  ///
  /// Installing a version that is already active or waiting is a no-op.
  /// Versions only move forward: a version older than the active one is
  /// rejected before anything is fetched.
  pub async fn install(&mut self) -> Result<()> {
    let version = self.config.generations.version();
    if let Some(active) = self.active.as_ref().map(|c| c.version()) {
      if version < active {
        return Err(eyre!(
          "Cannot install version {} while newer version {} is active",
          version,
          active
        ));
      }
    }
    let known = |c: &Option<OfflineCacheController<S, N>>| c.as_ref().map(|c| c.version()) == Some(version);
    if known(&self.active) || known(&self.waiting) {
      info!(version, "Version already installed");
      return Ok(());
    }

    let mut controller = OfflineCacheController::new(
      self.config.clone(),
      self.cache.clone(),
      self.network.clone(),
    );
    controller.install().await?;

    if let Some(mut previous) = self.waiting.replace(controller) {
      previous.retire();
    }

    if self.config.skip_waiting {
      self.activate()?;
    }
    Ok(())
  }

  /// Promote the waiting version, retiring the previously active one.
  ///
  /// Returns the generation names deleted during activation.
  pub fn activate(&mut self) -> Result<Vec<String>> {
    let mut controller = self
      .waiting
      .take()
      .ok_or_else(|| eyre!("No installed version is waiting to activate"))?;

    let deleted = match controller.activate() {
      Ok(deleted) => deleted,
      Err(e) => {
        self.waiting = Some(controller);
        return Err(e);
      }
    };

    if let Some(mut previous) = self.active.replace(controller) {
      previous.retire();
    }
    Ok(deleted)
  }

  /// Route a request to the active version, if any.
  pub async fn handle_fetch(&self, request: Request) -> FetchOutcome {
    match &self.active {
      Some(controller) => controller.handle_fetch(request).await,
      None => FetchOutcome::PassThrough(request),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, ResponseSource};
  use crate::net::testing::FakeNetwork;
  use std::sync::Arc;
  use url::Url;

  fn url(path: &str) -> Url {
    Url::parse("https://kelsa.example").unwrap().join(path).unwrap()
  }

  fn config(version: u32) -> ControllerConfig {
    ControllerConfig::new(url("/"), "kelsa-events", version)
      .with_manifest(vec![url("/index.html"), url("/css/styles.css")])
  }

  fn site() -> Arc<FakeNetwork> {
    Arc::new(
      FakeNetwork::new()
        .ok(url("/index.html").as_str(), "text/html", "<h1>index</h1>")
        .ok(url("/css/styles.css").as_str(), "text/css", "body {}"),
    )
  }

  #[tokio::test]
  async fn test_install_waits_for_activation() {
    let mut registration = Registration::new(config(1), CacheLayer::new(MemoryStorage::new()), site());

    registration.install().await.unwrap();
    assert!(registration.active().is_none());
    assert_eq!(registration.waiting().unwrap().state(), WorkerState::Installed);

    let outcome = registration.handle_fetch(Request::get(url("/css/styles.css"))).await;
    assert!(matches!(outcome, FetchOutcome::PassThrough(_)));

    registration.activate().unwrap();
    assert!(registration.waiting().is_none());
    let outcome = registration.handle_fetch(Request::get(url("/css/styles.css"))).await;
    assert_eq!(outcome.source(), Some(ResponseSource::Cache));
  }

  #[tokio::test]
  async fn test_skip_waiting_activates_immediately() {
    let mut registration = Registration::new(
      config(1).with_skip_waiting(true),
      CacheLayer::new(MemoryStorage::new()),
      site(),
    );

    registration.install().await.unwrap();
    assert_eq!(registration.active().unwrap().state(), WorkerState::Active);
    assert!(registration.waiting().is_none());
  }

  #[tokio::test]
  async fn test_activate_without_waiting_version_fails() {
    let mut registration = Registration::new(config(1), CacheLayer::new(MemoryStorage::new()), site());
    assert!(registration.activate().is_err());
  }

  #[tokio::test]
  async fn test_failed_upgrade_keeps_previous_version_serving() {
    let network = site();
    let cache = CacheLayer::new(MemoryStorage::new());

    let mut v1 = Registration::new(config(1), cache.clone(), Arc::clone(&network));
    v1.install().await.unwrap();
    v1.activate().unwrap();

    let broken = config(2).with_manifest(vec![url("/index.html"), url("/css/new.css")]);
    let mut v2 = Registration::restore(broken, cache.clone(), Arc::clone(&network)).unwrap();
    assert_eq!(v2.active().unwrap().version(), 1);

    assert!(v2.install().await.is_err());
    assert!(v2.waiting().is_none());
    assert_eq!(v2.active().unwrap().version(), 1);

    network.set_offline(true);
    let outcome = v2.handle_fetch(Request::get(url("/css/styles.css"))).await;
    assert_eq!(outcome.source(), Some(ResponseSource::Cache));
    assert_eq!(
      cache.storage().generations().unwrap(),
      vec!["kelsa-events-v1"]
    );
  }

  #[tokio::test]
  async fn test_upgrade_retires_previous_version() {
    let network = site();
    let cache = CacheLayer::new(MemoryStorage::new());

    let mut v1 = Registration::new(config(1), cache.clone(), Arc::clone(&network));
    v1.install().await.unwrap();
    v1.activate().unwrap();

    let mut v2 = Registration::restore(config(2), cache.clone(), Arc::clone(&network)).unwrap();
    v2.install().await.unwrap();
    let deleted = v2.activate().unwrap();

    assert_eq!(deleted, vec!["kelsa-events-v1"]);
    assert_eq!(v2.active().unwrap().version(), 2);

    let states = cache.recorded_states().unwrap();
    assert!(states.contains(&("kelsa-events-v1".to_string(), "redundant".to_string())));
    assert!(states.contains(&("kelsa-events-v2".to_string(), "active".to_string())));
  }

  #[tokio::test]
  async fn test_restore_picks_up_waiting_version() {
    let network = site();
    let cache = CacheLayer::new(MemoryStorage::new());

    let mut first = Registration::new(config(1), cache.clone(), Arc::clone(&network));
    first.install().await.unwrap();

    let mut second = Registration::restore(config(1), cache.clone(), Arc::clone(&network)).unwrap();
    assert!(second.active().is_none());
    assert_eq!(second.waiting().unwrap().version(), 1);

    // Already installed: no further network traffic
    let calls = network.calls();
    second.install().await.unwrap();
    assert_eq!(network.calls(), calls);

    second.activate().unwrap();
    let third = Registration::restore(config(1), cache, network).unwrap();
    assert_eq!(third.active().unwrap().state(), WorkerState::Active);
    assert!(third.waiting().is_none());
  }

  #[tokio::test]
  async fn test_older_version_cannot_replace_newer_active() {
    let network = site();
    let cache = CacheLayer::new(MemoryStorage::new());

    let mut v2 = Registration::new(config(2), cache.clone(), Arc::clone(&network));
    v2.install().await.unwrap();
    v2.activate().unwrap();

    let mut v1 = Registration::restore(config(1), cache.clone(), Arc::clone(&network)).unwrap();
    assert_eq!(v1.active().unwrap().version(), 2);

    let calls = network.calls();
    assert!(v1.install().await.is_err());
    assert_eq!(network.calls(), calls);
    assert!(v1.waiting().is_none());
    assert!(v1.activate().is_err());

    assert_eq!(v1.active().unwrap().version(), 2);
    assert_eq!(
      cache.storage().generations().unwrap(),
      vec!["kelsa-events-v2"]
    );
  }
}
