use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::worker::ControllerConfig;

/// Assets cached at install time.
const DEFAULT_MANIFEST: &[&str] = &[
  "/",
  "/index.html",
  "/contact.html",
  "/event.html",
  "/rentals.html",
  "/css/styles.css",
  "/css/mobile.css",
  "/css/form-styles.css",
  "/js/main.js",
  "/js/image-optimizer.js",
  "/js/form-validator.js",
  "/assets/favicon.ico",
  "/assets/images/kelsaevent1.webp",
  "/assets/images/even-card.webp",
  "/assets/images/rentals.webp",
  "/assets/images/venue_decoration.webp",
  "/manifest.json",
  "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/css/all.min.css",
  "https://fonts.googleapis.com/css2?family=Poppins:wght@300;400;500;600;700;800&display=swap",
];

/// Font/style CDNs whose requests are intercepted alongside the site's own.
const DEFAULT_TRUSTED_ORIGINS: &[&str] = &[
  "https://fonts.googleapis.com",
  "https://cdnjs.cloudflare.com",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin of the site whose requests are intercepted
  pub origin: String,
  pub cache: CacheConfig,
  /// Assets that must all be cached for a version to install; paths are
  /// resolved against `origin`
  pub manifest: Vec<String>,
  pub trusted_origins: Vec<String>,
  /// Document served when offline and the requested page was never cached
  pub offline_document: String,
  /// Activate a freshly installed version without waiting
  pub skip_waiting: bool,
  pub logging: LoggingConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080".to_string(),
      cache: CacheConfig::default(),
      manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
      trusted_origins: DEFAULT_TRUSTED_ORIGINS
        .iter()
        .map(|s| s.to_string())
        .collect(),
      offline_document: "/index.html".to_string(),
      skip_waiting: false,
      logging: LoggingConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Generation name prefix: `{prefix}-v{version}` and `{prefix}-dynamic-v{version}`
  pub prefix: String,
  /// Bumping this invalidates every previously installed generation
  pub version: u32,
  /// SQLite file (default: $XDG_DATA_HOME/kelsa-offline/cache.db)
  pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "kelsa-events".to_string(),
      version: 1,
      database: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// `tracing_subscriber::EnvFilter` directive, overridden by RUST_LOG
  pub filter: String,
  /// Write daily log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      filter: "kelsa_offline=info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./kelsa-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/kelsa-offline/config.yaml
  ///
  /// Falls back to the built-in defaults when no file exists.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("kelsa-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("kelsa-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  /// Where the cache database lives.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.database {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("kelsa-offline").join("cache.db"))
  }

  /// Validate and resolve into the controller's configuration.
  pub fn controller(&self) -> Result<ControllerConfig> {
    let origin = Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;
    if !origin.origin().is_tuple() {
      return Err(eyre!("Origin '{}' must be an http(s) URL", self.origin));
    }
    if self.cache.version == 0 {
      return Err(eyre!("cache.version must be at least 1"));
    }
    if self.cache.prefix.is_empty() {
      return Err(eyre!("cache.prefix must not be empty"));
    }

    let resolve = |s: &String| {
      origin
        .join(s)
        .map_err(|e| eyre!("Invalid URL '{}': {}", s, e))
    };

    let manifest = self
      .manifest
      .iter()
      .map(&resolve)
      .collect::<Result<Vec<_>>>()?;
    let trusted_origins = self
      .trusted_origins
      .iter()
      .map(|s| Url::parse(s).map_err(|e| eyre!("Invalid trusted origin '{}': {}", s, e)))
      .collect::<Result<Vec<_>>>()?;
    let offline_document = resolve(&self.offline_document)?;

    Ok(
      ControllerConfig::new(origin.clone(), &self.cache.prefix, self.cache.version)
        .with_manifest(manifest)
        .with_trusted_origins(trusted_origins)
        .with_offline_document(offline_document)
        .with_skip_waiting(self.skip_waiting),
    )
  }
}
