//! Long-running notification worker.
//!
//! Polls for due notifications on a fixed interval and sends each one,
//! retrying transport failures with capped exponential backoff. Anything
//! still failing after `max_attempts` stays unsent and is picked up again on
//! a later poll. Ctrl-C is honoured between polls.

use std::time::Duration;

use ontover_core::{
  Error,
  deprecation::{DeprecationManager, DeprecationNotification, NotificationDispatcher},
  store::OntologyStore,
};
use tracing::{error, info, warn};

use crate::settings::NotificationSettings;

/// Delay before retry number `attempt` (1-based): `initial * 2^(attempt-1)`,
/// capped at `max`.
pub fn backoff(initial: Duration, max: Duration, attempt: u32) -> Duration {
  let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
  initial.saturating_mul(factor).min(max)
}

pub async fn run<S, D>(
  manager: &DeprecationManager<S, D>,
  settings: &NotificationSettings,
) -> anyhow::Result<()>
where
  S: OntologyStore,
  D: NotificationDispatcher,
  Error: From<S::Error>,
{
  let mut ticker = tokio::time::interval(settings.poll_interval());
  let shutdown = tokio::signal::ctrl_c();
  tokio::pin!(shutdown);

  info!(interval_secs = settings.poll_interval().as_secs(), "notification worker started");
  loop {
    tokio::select! {
      res = &mut shutdown => {
        res?;
        info!("received shutdown signal; notification worker stopping");
        return Ok(());
      }
      _ = ticker.tick() => {
        poll_once(manager, settings).await;
      }
    }
  }
}

/// One poll: send everything that is due. Returns how many were sent.
pub async fn poll_once<S, D>(
  manager: &DeprecationManager<S, D>,
  settings: &NotificationSettings,
) -> usize
where
  S: OntologyStore,
  D: NotificationDispatcher,
  Error: From<S::Error>,
{
  let due = match manager.pending_notifications().await {
    Ok(due) => due,
    Err(e) => {
      error!(error = %e, "could not load pending notifications");
      return 0;
    }
  };

  let mut sent = 0;
  for notification in &due {
    if send_with_backoff(manager, settings, notification).await {
      sent += 1;
    }
  }
  if !due.is_empty() {
    info!(due = due.len(), sent, "notification poll complete");
  }
  sent
}

async fn send_with_backoff<S, D>(
  manager: &DeprecationManager<S, D>,
  settings: &NotificationSettings,
  notification: &DeprecationNotification,
) -> bool
where
  S: OntologyStore,
  D: NotificationDispatcher,
  Error: From<S::Error>,
{
  let max_attempts = settings.max_attempts.max(1);
  for attempt in 1..=max_attempts {
    match manager.send_notification(notification).await {
      Ok(_) => return true,
      Err(e) if e.is_deterministic() => {
        error!(notification = %notification.notification_id, error = %e, "notification cannot be sent");
        return false;
      }
      Err(e) => {
        warn!(
          notification = %notification.notification_id,
          attempt,
          max_attempts,
          error = %e,
          "notification send failed"
        );
        if attempt < max_attempts {
          let delay = backoff(settings.initial_backoff(), settings.max_backoff(), attempt);
          tokio::time::sleep(delay).await;
        }
      }
    }
  }
  error!(
    notification = %notification.notification_id,
    attempts = max_attempts,
    "giving up until next poll"
  );
  false
}
