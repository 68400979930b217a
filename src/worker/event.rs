//! Lifecycle events and the single table that dispatches them.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info};
use url::Url;

use super::controller::FetchOutcome;
use super::notification::{Notification, NotificationHost};
use super::registration::Registration;
use crate::cache::CacheStorage;
use crate::net::{Network, Request};

/// Background sync tag registered by the contact form.
pub const CONTACT_FORM_SYNC: &str = "contact-form-sync";

/// Lifecycle events a registration consumes
#[derive(Debug)]
pub enum Event {
  Install,
  Activate,
  Fetch(Request),
  Sync { tag: String },
  Push { data: Option<Bytes> },
  NotificationClick(Notification),
}

/// Result of handling one event
#[derive(Debug)]
pub enum EventOutcome {
  Installed,
  Activated { deleted: Vec<String> },
  Fetched(FetchOutcome),
  Synced { tag: String },
  NotificationShown(Notification),
  WindowOpened(Url),
  Ignored,
}

impl<S: CacheStorage, N: Network + Clone> Registration<S, N> {
  /// Handle one lifecycle event. Each event kind has exactly one handler.
  pub async fn dispatch<H: NotificationHost>(
    &mut self,
    event: Event,
    host: &H,
  ) -> Result<EventOutcome> {
    match event {
      Event::Install => {
        self.install().await?;
        Ok(EventOutcome::Installed)
      }
      Event::Activate => {
        let deleted = self.activate()?;
        Ok(EventOutcome::Activated { deleted })
      }
      Event::Fetch(request) => Ok(EventOutcome::Fetched(self.handle_fetch(request).await)),
      Event::Sync { tag } => {
        if tag == CONTACT_FORM_SYNC {
          // Pending form submissions are not queued yet, so there is nothing to replay
          info!(%tag, "Background sync triggered");
          Ok(EventOutcome::Synced { tag })
        } else {
          debug!(%tag, "Ignoring unknown sync tag");
          Ok(EventOutcome::Ignored)
        }
      }
      Event::Push { data } => {
        let notification = Notification::from_push(data.as_deref())?;
        host.show_notification(&notification)?;
        Ok(EventOutcome::NotificationShown(notification))
      }
      Event::NotificationClick(notification) => {
        host.close_notification(&notification);
        let target = self
          .config()
          .origin
          .join(&notification.url)
          .map_err(|e| eyre!("Invalid notification url {}: {}", notification.url, e))?;
        host.open_window(&target)?;
        Ok(EventOutcome::WindowOpened(target))
      }
    }
  }
}
