//! Notification transports.

use std::time::Duration;

use anyhow::Context as _;
use ontover_core::deprecation::{Notice, NotificationDispatcher};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DispatchError {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("webhook returned {status}: {body}")]
  Status { status: u16, body: String },
}

/// POSTs each notice as JSON to a fixed URL. Any non-2xx response is a
/// failed delivery.
#[derive(Clone)]
pub struct WebhookDispatcher {
  client: Client,
  url:    String,
}

impl WebhookDispatcher {
  pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, url: url.into() })
  }

  async fn post(&self, notice: &Notice) -> Result<(), DispatchError> {
    let resp = self
      .client
      .post(&self.url)
      .header("X-Ontover-Notification-Id", notice.notification_id.to_string())
      .json(notice)
      .send()
      .await?;

    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().await.unwrap_or_default();
      return Err(DispatchError::Status { status: status.as_u16(), body });
    }
    debug!(notification = %notice.notification_id, %status, "webhook accepted notice");
    Ok(())
  }
}

/// The configured transport.
pub enum Dispatcher {
  Webhook(WebhookDispatcher),
  /// No transport configured; notices are written to the log only.
  Log,
}

impl Dispatcher {
  pub fn from_url(url: Option<&str>) -> anyhow::Result<Self> {
    Ok(match url {
      Some(url) => Self::Webhook(WebhookDispatcher::new(url)?),
      None => Self::Log,
    })
  }
}

impl NotificationDispatcher for Dispatcher {
  type Error = DispatchError;

  async fn dispatch<'a>(&'a self, notice: &'a Notice) -> Result<(), DispatchError> {
    match self {
      Self::Webhook(webhook) => webhook.post(notice).await,
      Self::Log => {
        info!(
          notification = %notice.notification_id,
          urgency = %notice.urgency,
          recipients = ?notice.recipients,
          subject = %notice.subject,
          body = %notice.body,
          "deprecation notice"
        );
        Ok(())
      }
    }
  }
}
