//! Push notifications and the host that displays them.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use url::Url;

const NOTIFICATION_ICON: &str = "/assets/favicon.ico";
const VIBRATE_PATTERN: [u32; 3] = [100, 50, 100];

/// JSON body of a push message.
#[derive(Debug, Deserialize)]
pub struct PushPayload {
  pub title: String,
  #[serde(default)]
  pub body: Option<String>,
  #[serde(default)]
  pub url: Option<String>,
}

/// A notification ready to be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: Option<String>,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  /// Opened when the notification is clicked; relative to the site origin
  pub url: String,
}

impl Notification {
  /// Build a notification from raw push data.
  pub fn from_push(data: Option<&[u8]>) -> Result<Self> {
    let data = data.ok_or_else(|| eyre!("Push event carried no payload"))?;
    let payload: PushPayload =
      serde_json::from_slice(data).map_err(|e| eyre!("Failed to parse push payload: {}", e))?;
    Ok(payload.into())
  }
}

impl From<PushPayload> for Notification {
  fn from(payload: PushPayload) -> Self {
    Self {
      title: payload.title,
      body: payload.body,
      icon: NOTIFICATION_ICON.to_string(),
      badge: NOTIFICATION_ICON.to_string(),
      vibrate: VIBRATE_PATTERN.to_vec(),
      url: payload
        .url
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| "/".to_string()),
    }
  }
}

/// The environment that displays notifications and opens windows.
pub trait NotificationHost {
  fn show_notification(&self, notification: &Notification) -> Result<()>;

  fn close_notification(&self, notification: &Notification);

  fn open_window(&self, url: &Url) -> Result<()>;
}

/// Host that writes to the terminal.
pub struct ConsoleHost;

impl NotificationHost for ConsoleHost {
  fn show_notification(&self, notification: &Notification) -> Result<()> {
    let rendered = serde_json::to_string_pretty(notification)
      .map_err(|e| eyre!("Failed to render notification: {}", e))?;
    println!("{}", rendered);
    Ok(())
  }

  fn close_notification(&self, notification: &Notification) {
    tracing::debug!(title = %notification.title, "Notification closed");
  }

  fn open_window(&self, url: &Url) -> Result<()> {
    println!("open {}", url);
    Ok(())
  }
}
