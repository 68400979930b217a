mod cache;
mod config;
mod logging;
mod net;
mod worker;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};
use url::Url;

use cache::{CacheGeneration, CacheLayer, CacheStorage, SqliteStorage};
use net::{HttpNetwork, Network, Request, Response};
use worker::{ConsoleHost, Event, EventOutcome, FetchOutcome, Notification, PushPayload, Registration};

#[derive(Parser, Debug)]
#[command(name = "kelsa-offline")]
#[command(about = "Offline caching controller for the Kelsa Events site")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/kelsa-offline/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Site origin to intercept
  #[arg(long, global = true)]
  origin: Option<String>,

  /// Cache version to install or serve
  #[arg(long, global = true)]
  cache_version: Option<u32>,

  /// Increase log verbosity (-v debug, -vv trace)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch and store the asset manifest for the configured version
  Install {
    /// Activate right after a successful install
    #[arg(long)]
    activate: bool,
  },
  /// Promote the installed version and delete old generations
  Activate,
  /// Fetch URLs through the active controller
  Fetch {
    /// Absolute URLs or paths relative to the origin
    #[arg(required = true)]
    urls: Vec<String>,
    /// Send the requests as page navigations
    #[arg(long)]
    html: bool,
    /// Print response bodies
    #[arg(long)]
    body: bool,
  },
  /// List stored generations
  Generations,
  /// Deliver a background sync event
  Sync { tag: String },
  /// Deliver a push message with a JSON payload
  Push { payload: String },
  /// Simulate clicking a notification that points at URL
  Click { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Command line overrides
  if let Some(origin) = args.origin {
    config.origin = origin;
  }
  if let Some(version) = args.cache_version {
    config.cache.version = version;
  }

  let _guard = logging::init(&config.logging, args.verbose)?;

  let database = config.database_path()?;
  debug!(path = %database.display(), "Opening cache database");
  let cache = CacheLayer::new(SqliteStorage::open(&database)?);
  let network = HttpNetwork::new()?;
  let mut registration = Registration::restore(config.controller()?, cache.clone(), network.clone())?;
  let host = ConsoleHost;

  match args.command {
    Command::Install { activate } => {
      report(registration.dispatch(Event::Install, &host).await?);
      if activate && registration.waiting().is_some() {
        report(registration.dispatch(Event::Activate, &host).await?);
      }
    }
    Command::Activate => report(registration.dispatch(Event::Activate, &host).await?),
    Command::Fetch { urls, html, body } => {
      let origin = registration.config().origin.clone();
      let requests = urls
        .iter()
        .map(|u| {
          let url = origin
            .join(u)
            .map_err(|e| eyre!("Invalid URL '{}': {}", u, e))?;
          Ok(if html { Request::document(url) } else { Request::get(url) })
        })
        .collect::<Result<Vec<_>>>()?;

      let outcomes = futures::future::join_all(
        requests
          .into_iter()
          .map(|request| fetch_one(&registration, &network, request)),
      )
      .await;

      for outcome in outcomes {
        let (url, response, source) = outcome?;
        println!(
          "{} {:<16} {:<28} {:>8} {}",
          response.status().as_u16(),
          source,
          response.content_type().unwrap_or("-"),
          response.body_len(),
          url
        );
        if body {
          println!("{}", String::from_utf8_lossy(&response.into_body()));
        }
      }
    }
    Command::Generations => list_generations(&cache, &registration.config().generations.prefix)?,
    Command::Sync { tag } => report(registration.dispatch(Event::Sync { tag }, &host).await?),
    Command::Push { payload } => {
      let data = Some(Bytes::from(payload));
      report(registration.dispatch(Event::Push { data }, &host).await?);
    }
    Command::Click { url } => {
      let notification = Notification::from(PushPayload {
        title: "Kelsa Events".to_string(),
        body: None,
        url: Some(url),
      });
      report(
        registration
          .dispatch(Event::NotificationClick(notification), &host)
          .await?,
      );
    }
  }

  Ok(())
}

/// Run one request through the registration, going to the network ourselves
/// when the controller passes it through.
async fn fetch_one<S: CacheStorage, N: Network + Clone>(
  registration: &Registration<S, N>,
  network: &N,
  request: Request,
) -> Result<(Url, Response, String)> {
  let url = request.url.clone();
  match registration.handle_fetch(request).await {
    FetchOutcome::Respond { response, source } => Ok((url, response, source.to_string())),
    FetchOutcome::PassThrough(request) => {
      let response = network.fetch(&request).await?;
      Ok((url, response, "passthrough".to_string()))
    }
  }
}

fn list_generations<S: CacheStorage>(cache: &CacheLayer<S>, prefix: &str) -> Result<()> {
  let states: HashMap<String, String> = cache.recorded_states()?.into_iter().collect();
  let storage = cache.storage();

  for name in storage.generations()? {
    let entries = storage.keys(&name)?.len();
    match CacheGeneration::parse(prefix, &name) {
      Some(generation) => println!(
        "{:<32} {:<8} v{:<4} {:>5} entries  {}",
        name,
        generation.kind(),
        generation.version(),
        entries,
        states.get(&name).map(String::as_str).unwrap_or("-")
      ),
      None => println!("{:<32} {:<8} {:<5} {:>5} entries", name, "foreign", "-", entries),
    }
  }
  Ok(())
}

fn report(outcome: EventOutcome) {
  match outcome {
    EventOutcome::Installed => info!("Install finished"),
    EventOutcome::Activated { deleted } => {
      info!(deleted = deleted.len(), "Activated");
      for name in deleted {
        println!("deleted {}", name);
      }
    }
    EventOutcome::Synced { tag } => println!("synced {}", tag),
    EventOutcome::Ignored => println!("ignored"),
    EventOutcome::Fetched(_) | EventOutcome::NotificationShown(_) | EventOutcome::WindowOpened(_) => {}
  }
}
