//! Best-effort domain events.
//!
//! Events are handed to an [`EventSink`] after the triggering operation has
//! succeeded. A sink failure is logged and otherwise ignored; it never fails
//! the operation that produced the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deprecation::NotificationType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
  VersionCreated {
    tenant_id: Uuid,
    ontology:  String,
    version:   String,
  },
  VersionPublished {
    tenant_id: Uuid,
    ontology:  String,
    version:   String,
    previous:  Option<String>,
  },
  MigrationRecorded {
    migration_id: Uuid,
    tenant_id:    Uuid,
    ontology:     String,
    from_version: String,
    to_version:   String,
  },
  MigrationApplied {
    migration_id: Uuid,
    tenant_id:    Uuid,
    ontology:     String,
    to_version:   String,
  },
  RolledBack {
    tenant_id:    Uuid,
    ontology:     String,
    from_version: String,
    to_version:   String,
    steps:        usize,
  },
  DeprecationScheduled {
    policy_id:        Uuid,
    tenant_id:        Uuid,
    entity:           String,
    deprecation_date: DateTime<Utc>,
  },
  NotificationSent {
    policy_id:         Uuid,
    notification_id:   Uuid,
    notification_type: NotificationType,
  },
  /// Backward-compatibility shims for `entity` may now be removed.
  DeprecationCompleted {
    policy_id: Uuid,
    tenant_id: Uuid,
    entity:    String,
  },
}

impl DomainEvent {
  pub fn name(&self) -> &'static str {
    match self {
      Self::VersionCreated { .. } => "version_created",
      Self::VersionPublished { .. } => "version_published",
      Self::MigrationRecorded { .. } => "migration_recorded",
      Self::MigrationApplied { .. } => "migration_applied",
      Self::RolledBack { .. } => "rolled_back",
      Self::DeprecationScheduled { .. } => "deprecation_scheduled",
      Self::NotificationSent { .. } => "notification_sent",
      Self::DeprecationCompleted { .. } => "deprecation_completed",
    }
  }
}

/// The event-bus collaborator. Publishing is fire-and-forget, so the method
/// is synchronous; implementations that talk to a remote bus should enqueue.
pub trait EventSink: Send + Sync {
  fn publish(
    &self,
    event: &DomainEvent,
  ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Writes every event as a structured `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
  fn publish(
    &self,
    event: &DomainEvent,
  ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let payload = serde_json::to_string(event)?;
    tracing::info!(target: "ontover::events", event = event.name(), %payload);
    Ok(())
  }
}

/// Publish `event`, logging rather than propagating any failure.
pub fn emit(sink: &dyn EventSink, event: DomainEvent) {
  if let Err(e) = sink.publish(&event) {
    tracing::warn!(event = event.name(), error = %e, "failed to publish domain event");
  }
}
