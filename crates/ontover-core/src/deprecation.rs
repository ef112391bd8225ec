//! Deprecation windows for breaking changes.
//!
//! Scheduling a deprecation fixes the whole notification timeline up front:
//! five notices at fixed offsets from the scheduling instant, ending on the
//! deprecation date twelve months out. The offsets are never recomputed.
//! Notices are picked up by polling [`DeprecationManager::pending_notifications`];
//! the manager does not retry failed dispatches itself.

use std::{future::Future, sync::Arc};

use chrono::{DateTime, Months, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  change::{ChangeType, OntologyChange},
  events::{DomainEvent, EventSink, emit},
  store::OntologyStore,
};

// ─── Notification types ──────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum NotificationType {
  #[serde(rename = "6_months")]
  #[strum(serialize = "6_months")]
  SixMonths,
  #[serde(rename = "3_months")]
  #[strum(serialize = "3_months")]
  ThreeMonths,
  #[serde(rename = "1_month")]
  #[strum(serialize = "1_month")]
  OneMonth,
  #[serde(rename = "7_days")]
  #[strum(serialize = "7_days")]
  SevenDays,
  #[serde(rename = "final")]
  #[strum(serialize = "final")]
  Final,
}

impl NotificationType {
  pub const ALL: [Self; 5] =
    [Self::SixMonths, Self::ThreeMonths, Self::OneMonth, Self::SevenDays, Self::Final];

  pub fn urgency(self) -> Urgency {
    match self {
      Self::SixMonths | Self::ThreeMonths => Urgency::Info,
      Self::OneMonth => Urgency::Warning,
      Self::SevenDays | Self::Final => Urgency::Urgent,
    }
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Urgency {
  Info,
  Warning,
  Urgent,
}

// ─── Policy ──────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PolicyStatus {
  Scheduled,
  Completed,
}

/// Position of a policy in its state machine, derived from its
/// notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "last_notice", rename_all = "snake_case")]
pub enum DeprecationPhase {
  /// No notice has gone out yet.
  Scheduled,
  /// At least one advance notice has gone out.
  Notifying(NotificationType),
  /// The final notice has gone out; the deprecation is in force.
  Final,
  Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeprecationNotification {
  pub notification_id:   Uuid,
  pub policy_id:         Uuid,
  pub scheduled_date:    DateTime<Utc>,
  pub notification_type: NotificationType,
  pub message:           String,
  pub sent:              bool,
  pub sent_at:           Option<DateTime<Utc>>,
  pub recipients:        Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeprecationPolicy {
  pub policy_id:               Uuid,
  pub tenant_id:               Uuid,
  pub change_id:               Uuid,
  pub scheduled_at:            DateTime<Utc>,
  pub deprecation_date:        DateTime<Utc>,
  pub status:                  PolicyStatus,
  pub completed_at:            Option<DateTime<Utc>>,
  pub deprecated_entity_name:  String,
  pub replacement_entity_name: Option<String>,
  /// Always five, in timeline order.
  pub notifications:           Vec<DeprecationNotification>,
}

impl DeprecationPolicy {
  pub fn phase(&self) -> DeprecationPhase {
    if self.status == PolicyStatus::Completed {
      return DeprecationPhase::Completed;
    }
    let last_sent = self
      .notifications
      .iter()
      .filter(|n| n.sent)
      .max_by_key(|n| n.scheduled_date)
      .map(|n| n.notification_type);
    match last_sent {
      None => DeprecationPhase::Scheduled,
      Some(NotificationType::Final) => DeprecationPhase::Final,
      Some(other) => DeprecationPhase::Notifying(other),
    }
  }

  pub fn notification(&self, kind: NotificationType) -> Option<&DeprecationNotification> {
    self.notifications.iter().find(|n| n.notification_type == kind)
  }
}

/// The deprecation date and the five notice dates for a schedule created at
/// `scheduled_at`.
pub fn timeline(
  scheduled_at: DateTime<Utc>,
) -> Result<(DateTime<Utc>, [(NotificationType, DateTime<Utc>); 5])> {
  let months = |n: u32| scheduled_at.checked_add_months(Months::new(n)).ok_or(Error::DateOutOfRange);
  let deprecation_date = months(12)?;
  let week_before = deprecation_date
    .checked_sub_signed(TimeDelta::days(7))
    .ok_or(Error::DateOutOfRange)?;
  Ok((deprecation_date, [
    (NotificationType::SixMonths, months(6)?),
    (NotificationType::ThreeMonths, months(9)?),
    (NotificationType::OneMonth, months(11)?),
    (NotificationType::SevenDays, week_before),
    (NotificationType::Final, deprecation_date),
  ]))
}

/// What is being deprecated and what replaces it, in `Entity` or
/// `Entity.property` form.
fn subject_of(change: &OntologyChange) -> (String, Option<String>) {
  let entity = change.entity_type.as_str();
  let qualified = |prop: &str| {
    if entity.is_empty() { prop.to_owned() } else { format!("{entity}.{prop}") }
  };
  match change.change_type {
    ChangeType::EntityRenamed => (
      change.old_value.clone().unwrap_or_else(|| entity.to_owned()),
      change.new_value.clone(),
    ),
    ChangeType::PropertyRenamed | ChangeType::RelationshipRenamed => (
      qualified(change.old_value.as_deref().unwrap_or_default()),
      change.new_value.as_deref().map(qualified),
    ),
    ChangeType::EntityAdded | ChangeType::EntityRemoved => (entity.to_owned(), None),
    _ => match change.property_name.as_deref() {
      Some(prop) => (qualified(prop), None),
      None => (entity.to_owned(), None),
    },
  }
}

fn render_message(
  kind: NotificationType,
  deprecated: &str,
  replacement: Option<&str>,
  deprecation_date: DateTime<Utc>,
) -> String {
  let date = deprecation_date.format("%Y-%m-%d");
  let advice = match replacement {
    Some(r) => format!("Migrate to {r} before then."),
    None => "Remove any dependency on it before then.".to_owned(),
  };
  match kind {
    NotificationType::SixMonths | NotificationType::ThreeMonths => {
      format!("{deprecated} is deprecated and will be removed on {date}. {advice}")
    }
    NotificationType::OneMonth => {
      format!("{deprecated} will be removed in one month, on {date}. {advice}")
    }
    NotificationType::SevenDays => {
      format!("{deprecated} will be removed in 7 days, on {date}. {advice}")
    }
    NotificationType::Final => format!(
      "{deprecated} reached its deprecation date ({date}); backward compatibility is being removed."
    ),
  }
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

/// A rendered notice, ready for the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
  pub notification_id:   Uuid,
  pub policy_id:         Uuid,
  pub tenant_id:         Uuid,
  pub notification_type: NotificationType,
  pub urgency:           Urgency,
  pub recipients:        Vec<String>,
  pub subject:           String,
  pub body:              String,
}

impl Notice {
  pub fn render(policy: &DeprecationPolicy, notification: &DeprecationNotification) -> Self {
    let urgency = notification.notification_type.urgency();
    Self {
      notification_id: notification.notification_id,
      policy_id: policy.policy_id,
      tenant_id: policy.tenant_id,
      notification_type: notification.notification_type,
      urgency,
      recipients: notification.recipients.clone(),
      subject: format!(
        "[{}] Deprecation notice: {}",
        urgency.to_string().to_uppercase(),
        policy.deprecated_entity_name
      ),
      body: notification.message.clone(),
    }
  }
}

/// The notification transport collaborator (email, webhook, ...).
pub trait NotificationDispatcher: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn dispatch<'a>(
    &'a self,
    notice: &'a Notice,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

// ─── Manager ─────────────────────────────────────────────────────────────────

pub struct DeprecationManager<S, D> {
  store:      S,
  dispatcher: D,
  events:     Arc<dyn EventSink>,
}

impl<S, D> DeprecationManager<S, D>
where
  S: OntologyStore,
  D: NotificationDispatcher,
  Error: From<S::Error>,
{
  pub fn new(store: S, dispatcher: D, events: Arc<dyn EventSink>) -> Self {
    Self { store, dispatcher, events }
  }

  /// Schedule a deprecation window for `change`, starting now.
  pub async fn schedule_deprecation(
    &self,
    change: &OntologyChange,
    tenant_id: Uuid,
    recipients: Vec<String>,
  ) -> Result<DeprecationPolicy> {
    self.schedule_deprecation_at(change, tenant_id, recipients, Utc::now()).await
  }

  /// As [`Self::schedule_deprecation`], with an explicit scheduling instant.
  pub async fn schedule_deprecation_at(
    &self,
    change: &OntologyChange,
    tenant_id: Uuid,
    recipients: Vec<String>,
    scheduled_at: DateTime<Utc>,
  ) -> Result<DeprecationPolicy> {
    if !change.is_breaking() {
      return Err(Error::InvalidChange(format!(
        "change {} is not breaking; no deprecation window needed",
        change.change_id
      )));
    }
    if recipients.is_empty() {
      warn!(change = %change.change_id, "deprecation scheduled with no recipients");
    }

    let (deprecation_date, dates) = timeline(scheduled_at)?;
    let (deprecated, replacement) = subject_of(change);
    let policy_id = Uuid::new_v4();

    let notifications = dates
      .into_iter()
      .map(|(kind, date)| DeprecationNotification {
        notification_id:   Uuid::new_v4(),
        policy_id,
        scheduled_date:    date,
        notification_type: kind,
        message:           render_message(
          kind,
          &deprecated,
          replacement.as_deref(),
          deprecation_date,
        ),
        sent:              false,
        sent_at:           None,
        recipients:        recipients.clone(),
      })
      .collect();

    let policy = DeprecationPolicy {
      policy_id,
      tenant_id,
      change_id: change.change_id,
      scheduled_at,
      deprecation_date,
      status: PolicyStatus::Scheduled,
      completed_at: None,
      deprecated_entity_name: deprecated,
      replacement_entity_name: replacement,
      notifications,
    };
    self.store.insert_policy(&policy).await?;

    info!(
      policy = %policy_id,
      tenant = %tenant_id,
      entity = %policy.deprecated_entity_name,
      deprecation_date = %deprecation_date,
      "deprecation scheduled"
    );
    emit(self.events.as_ref(), DomainEvent::DeprecationScheduled {
      policy_id,
      tenant_id,
      entity: policy.deprecated_entity_name.clone(),
      deprecation_date,
    });
    Ok(policy)
  }

  /// Unsent notifications that are due now.
  pub async fn pending_notifications(&self) -> Result<Vec<DeprecationNotification>> {
    self.pending_notifications_at(Utc::now()).await
  }

  pub async fn pending_notifications_at(
    &self,
    as_of: DateTime<Utc>,
  ) -> Result<Vec<DeprecationNotification>> {
    Ok(self.store.due_notifications(as_of).await?)
  }

  /// Dispatch one notification and mark it sent. A dispatch failure leaves
  /// it unsent and is returned to the caller, so the next poll picks it up
  /// again.
  pub async fn send_notification(
    &self,
    notification: &DeprecationNotification,
  ) -> Result<DeprecationNotification> {
    if notification.sent {
      debug!(notification = %notification.notification_id, "already sent; skipping");
      return Ok(notification.clone());
    }

    let policy = self.get_policy(notification.policy_id).await?;
    let notice = Notice::render(&policy, notification);

    self
      .dispatcher
      .dispatch(&notice)
      .await
      .map_err(|e| Error::Dispatch {
        notification_id: notification.notification_id,
        source:          Box::new(e),
      })?;

    let sent_at = Utc::now();
    let first = self
      .store
      .mark_notification_sent(notification.notification_id, sent_at)
      .await?;
    if !first {
      warn!(
        notification = %notification.notification_id,
        "notification was already marked sent; delivered more than once"
      );
    }

    info!(
      policy = %policy.policy_id,
      notification = %notification.notification_id,
      kind = %notification.notification_type,
      urgency = %notice.urgency,
      recipients = notice.recipients.len(),
      "deprecation notice sent"
    );
    emit(self.events.as_ref(), DomainEvent::NotificationSent {
      policy_id:         policy.policy_id,
      notification_id:   notification.notification_id,
      notification_type: notification.notification_type,
    });

    Ok(DeprecationNotification {
      sent: true,
      sent_at: Some(sent_at),
      ..notification.clone()
    })
  }

  /// Mark the policy completed and signal that compatibility shims for the
  /// deprecated entity can go. Completing before the final notice has gone
  /// out is allowed but logged.
  pub async fn complete_deprecation(&self, policy_id: Uuid) -> Result<DeprecationPolicy> {
    let mut policy = self.get_policy(policy_id).await?;
    if policy.status == PolicyStatus::Completed {
      return Err(Error::Conflict(format!("deprecation {policy_id} is already completed")));
    }
    if policy.phase() != DeprecationPhase::Final {
      warn!(
        policy = %policy_id,
        phase = ?policy.phase(),
        "completing deprecation before the final notice was sent"
      );
    }

    let completed_at = Utc::now();
    if !self.store.complete_policy(policy_id, completed_at).await? {
      return Err(Error::Conflict(format!("deprecation {policy_id} is already completed")));
    }
    policy.status = PolicyStatus::Completed;
    policy.completed_at = Some(completed_at);

    info!(policy = %policy_id, entity = %policy.deprecated_entity_name, "deprecation completed");
    emit(self.events.as_ref(), DomainEvent::DeprecationCompleted {
      policy_id,
      tenant_id: policy.tenant_id,
      entity: policy.deprecated_entity_name.clone(),
    });
    Ok(policy)
  }

  pub async fn get_policy(&self, policy_id: Uuid) -> Result<DeprecationPolicy> {
    self
      .store
      .get_policy(policy_id)
      .await?
      .ok_or_else(|| Error::NotFound(format!("deprecation policy {policy_id}")))
  }

  pub async fn list_policies(&self, tenant_id: Uuid) -> Result<Vec<DeprecationPolicy>> {
    Ok(self.store.list_policies(tenant_id).await?)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timeline_is_fixed_from_schedule_time() {
    let t0 = Utc.with_ymd_and_hms(2025, 1, 15, 9, 30, 0).unwrap();
    let (deprecation, dates) = timeline(t0).unwrap();

    assert_eq!(deprecation, Utc.with_ymd_and_hms(2026, 1, 15, 9, 30, 0).unwrap());
    let expected = [
      (NotificationType::SixMonths, Utc.with_ymd_and_hms(2025, 7, 15, 9, 30, 0).unwrap()),
      (NotificationType::ThreeMonths, Utc.with_ymd_and_hms(2025, 10, 15, 9, 30, 0).unwrap()),
      (NotificationType::OneMonth, Utc.with_ymd_and_hms(2025, 12, 15, 9, 30, 0).unwrap()),
      (NotificationType::SevenDays, Utc.with_ymd_and_hms(2026, 1, 8, 9, 30, 0).unwrap()),
      (NotificationType::Final, deprecation),
    ];
    assert_eq!(dates, expected);
  }

  #[test]
  fn month_arithmetic_clamps_to_month_end() {
    let t0 = Utc.with_ymd_and_hms(2024, 8, 31, 0, 0, 0).unwrap();
    let (_, dates) = timeline(t0).unwrap();
    // Feb 2025 has 28 days.
    assert_eq!(dates[0].1, Utc.with_ymd_and_hms(2025, 2, 28, 0, 0, 0).unwrap());
  }

  #[test]
  fn urgency_escalates() {
    let urgencies: Vec<Urgency> = NotificationType::ALL.iter().map(|t| t.urgency()).collect();
    assert_eq!(urgencies, vec![
      Urgency::Info,
      Urgency::Info,
      Urgency::Warning,
      Urgency::Urgent,
      Urgency::Urgent,
    ]);
  }

  #[test]
  fn notification_types_use_wire_names() {
    assert_eq!(serde_json::to_string(&NotificationType::SixMonths).unwrap(), "\"6_months\"");
    assert_eq!(NotificationType::SevenDays.to_string(), "7_days");
    assert_eq!("final".parse::<NotificationType>().unwrap(), NotificationType::Final);
  }

  #[test]
  fn property_rename_names_both_sides() {
    let change = OntologyChange::new(ChangeType::PropertyRenamed, "Lender")
      .with_old("apr")
      .with_new("rate")
      .breaking();
    let (deprecated, replacement) = subject_of(&change);
    assert_eq!(deprecated, "Lender.apr");
    assert_eq!(replacement.as_deref(), Some("Lender.rate"));
  }

  #[test]
  fn messages_mention_date_and_replacement() {
    let date = Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap();
    let msg = render_message(NotificationType::OneMonth, "Broker", Some("Lender"), date);
    assert_eq!(
      msg,
      "Broker will be removed in one month, on 2026-01-15. Migrate to Lender before then."
    );
  }

  fn policy_with_sent(sent: &[NotificationType]) -> DeprecationPolicy {
    let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let (deprecation_date, dates) = timeline(t0).unwrap();
    let policy_id = Uuid::new_v4();
    DeprecationPolicy {
      policy_id,
      tenant_id: Uuid::new_v4(),
      change_id: Uuid::new_v4(),
      scheduled_at: t0,
      deprecation_date,
      status: PolicyStatus::Scheduled,
      completed_at: None,
      deprecated_entity_name: "Broker".into(),
      replacement_entity_name: None,
      notifications: dates
        .into_iter()
        .map(|(kind, date)| DeprecationNotification {
          notification_id:   Uuid::new_v4(),
          policy_id,
          scheduled_date:    date,
          notification_type: kind,
          message:           String::new(),
          sent:              sent.contains(&kind),
          sent_at:           None,
          recipients:        vec![],
        })
        .collect(),
    }
  }

  #[test]
  fn phase_tracks_latest_sent_notice() {
    assert_eq!(policy_with_sent(&[]).phase(), DeprecationPhase::Scheduled);
    assert_eq!(
      policy_with_sent(&[NotificationType::SixMonths, NotificationType::ThreeMonths]).phase(),
      DeprecationPhase::Notifying(NotificationType::ThreeMonths)
    );
    assert_eq!(policy_with_sent(&NotificationType::ALL).phase(), DeprecationPhase::Final);

    let mut done = policy_with_sent(&NotificationType::ALL);
    done.status = PolicyStatus::Completed;
    assert_eq!(done.phase(), DeprecationPhase::Completed);
  }

  #[test]
  fn notice_subject_carries_urgency() {
    let policy = policy_with_sent(&[]);
    let notice = Notice::render(&policy, policy.notification(NotificationType::SevenDays).unwrap());
    assert_eq!(notice.urgency, Urgency::Urgent);
    assert_eq!(notice.subject, "[URGENT] Deprecation notice: Broker");
  }
}
