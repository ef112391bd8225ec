//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (nanosecond
//! precision, `Z` suffix) so that string order is time order and range
//! comparisons can run in SQL. UUIDs are hyphenated lowercase strings.
//! Migration status is stored as compact JSON next to its label.

use chrono::{DateTime, SecondsFormat, Utc};
use ontover_core::{
  deprecation::{
    DeprecationNotification, DeprecationPolicy, NotificationType, PolicyStatus,
  },
  migration::{MigrationRecord, MigrationStatus},
  scripts::MigrationScripts,
  version::OntologyVersion,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn encode_status(status: &MigrationStatus) -> Result<String> {
  Ok(serde_json::to_string(status)?)
}

pub fn decode_policy_status(s: &str) -> Result<PolicyStatus> {
  s.parse().map_err(|_| Error::Decode { column: "status", value: s.to_owned() })
}

pub fn decode_notification_type(s: &str) -> Result<NotificationType> {
  s.parse().map_err(|_| Error::Decode {
    column: "notification_type",
    value:  s.to_owned(),
  })
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from an `ontology_versions` row.
pub struct RawVersion {
  pub id:            String,
  pub tenant_id:     String,
  pub ontology_name: String,
  pub version:       String,
  pub model_json:    String,
  pub is_active:     bool,
  pub created_at:    String,
  pub created_by:    String,
  pub branch:        String,
  pub published_at:  Option<String>,
}

/// Column list matching [`RawVersion::from_row`].
pub const VERSION_COLUMNS: &str = "id, tenant_id, ontology_name, version, model_json, \
                                   is_active, created_at, created_by, branch, published_at";

impl RawVersion {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:            row.get(0)?,
      tenant_id:     row.get(1)?,
      ontology_name: row.get(2)?,
      version:       row.get(3)?,
      model_json:    row.get(4)?,
      is_active:     row.get(5)?,
      created_at:    row.get(6)?,
      created_by:    row.get(7)?,
      branch:        row.get(8)?,
      published_at:  row.get(9)?,
    })
  }

  pub fn into_version(self) -> Result<OntologyVersion> {
    Ok(OntologyVersion {
      id:            decode_uuid(&self.id)?,
      tenant_id:     decode_uuid(&self.tenant_id)?,
      ontology_name: self.ontology_name,
      version:       self.version,
      model_json:    self.model_json,
      is_active:     self.is_active,
      created_at:    decode_dt(&self.created_at)?,
      created_by:    self.created_by,
      branch:        self.branch,
      published_at:  decode_opt_dt(self.published_at)?,
    })
  }
}

/// Raw values read directly from a `migrations` row.
pub struct RawMigration {
  pub migration_id:           String,
  pub tenant_id:              String,
  pub ontology_name:          String,
  pub from_version:           String,
  pub to_version:             String,
  pub sql_script:             String,
  pub sql_rollback_script:    String,
  pub cypher_script:          String,
  pub cypher_rollback_script: String,
  pub generated_at:           String,
  pub change_count:           i64,
  pub status_json:            String,
  pub recorded_at:            String,
  pub applied_at:             Option<String>,
}

pub const MIGRATION_COLUMNS: &str = "migration_id, tenant_id, ontology_name, from_version, \
                                     to_version, sql_script, sql_rollback_script, \
                                     cypher_script, cypher_rollback_script, generated_at, \
                                     change_count, status_json, recorded_at, applied_at";

impl RawMigration {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      migration_id:           row.get(0)?,
      tenant_id:              row.get(1)?,
      ontology_name:          row.get(2)?,
      from_version:           row.get(3)?,
      to_version:             row.get(4)?,
      sql_script:             row.get(5)?,
      sql_rollback_script:    row.get(6)?,
      cypher_script:          row.get(7)?,
      cypher_rollback_script: row.get(8)?,
      generated_at:           row.get(9)?,
      change_count:           row.get(10)?,
      status_json:            row.get(11)?,
      recorded_at:            row.get(12)?,
      applied_at:             row.get(13)?,
    })
  }

  pub fn into_record(self) -> Result<MigrationRecord> {
    let change_count = usize::try_from(self.change_count).map_err(|_| Error::Decode {
      column: "change_count",
      value:  self.change_count.to_string(),
    })?;
    Ok(MigrationRecord {
      migration_id: decode_uuid(&self.migration_id)?,
      tenant_id: decode_uuid(&self.tenant_id)?,
      ontology: self.ontology_name,
      scripts: MigrationScripts {
        from_version:           self.from_version,
        to_version:             self.to_version,
        sql_script:             self.sql_script,
        sql_rollback_script:    self.sql_rollback_script,
        cypher_script:          self.cypher_script,
        cypher_rollback_script: self.cypher_rollback_script,
        generated_at:           decode_dt(&self.generated_at)?,
      },
      change_count,
      status: serde_json::from_str(&self.status_json)?,
      recorded_at: decode_dt(&self.recorded_at)?,
      applied_at: decode_opt_dt(self.applied_at)?,
    })
  }
}

/// Raw values read directly from a `deprecation_policies` row.
pub struct RawPolicy {
  pub policy_id:               String,
  pub tenant_id:               String,
  pub change_id:               String,
  pub scheduled_at:            String,
  pub deprecation_date:        String,
  pub status:                  String,
  pub completed_at:            Option<String>,
  pub deprecated_entity_name:  String,
  pub replacement_entity_name: Option<String>,
}

pub const POLICY_COLUMNS: &str = "policy_id, tenant_id, change_id, scheduled_at, \
                                  deprecation_date, status, completed_at, \
                                  deprecated_entity_name, replacement_entity_name";

impl RawPolicy {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      policy_id:               row.get(0)?,
      tenant_id:               row.get(1)?,
      change_id:               row.get(2)?,
      scheduled_at:            row.get(3)?,
      deprecation_date:        row.get(4)?,
      status:                  row.get(5)?,
      completed_at:            row.get(6)?,
      deprecated_entity_name:  row.get(7)?,
      replacement_entity_name: row.get(8)?,
    })
  }

  pub fn into_policy(self, notifications: Vec<RawNotification>) -> Result<DeprecationPolicy> {
    Ok(DeprecationPolicy {
      policy_id:               decode_uuid(&self.policy_id)?,
      tenant_id:               decode_uuid(&self.tenant_id)?,
      change_id:               decode_uuid(&self.change_id)?,
      scheduled_at:            decode_dt(&self.scheduled_at)?,
      deprecation_date:        decode_dt(&self.deprecation_date)?,
      status:                  decode_policy_status(&self.status)?,
      completed_at:            decode_opt_dt(self.completed_at)?,
      deprecated_entity_name:  self.deprecated_entity_name,
      replacement_entity_name: self.replacement_entity_name,
      notifications:           notifications
        .into_iter()
        .map(RawNotification::into_notification)
        .collect::<Result<_>>()?,
    })
  }
}

/// Raw values read directly from a `deprecation_notifications` row.
pub struct RawNotification {
  pub notification_id:   String,
  pub policy_id:         String,
  pub scheduled_date:    String,
  pub notification_type: String,
  pub message:           String,
  pub sent:              bool,
  pub sent_at:           Option<String>,
  pub recipients:        String,
}

pub const NOTIFICATION_COLUMNS: &str = "n.notification_id, n.policy_id, n.scheduled_date, \
                                        n.notification_type, n.message, n.sent, n.sent_at, \
                                        n.recipients";

impl RawNotification {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      notification_id:   row.get(0)?,
      policy_id:         row.get(1)?,
      scheduled_date:    row.get(2)?,
      notification_type: row.get(3)?,
      message:           row.get(4)?,
      sent:              row.get(5)?,
      sent_at:           row.get(6)?,
      recipients:        row.get(7)?,
    })
  }

  pub fn into_notification(self) -> Result<DeprecationNotification> {
    Ok(DeprecationNotification {
      notification_id:   decode_uuid(&self.notification_id)?,
      policy_id:         decode_uuid(&self.policy_id)?,
      scheduled_date:    decode_dt(&self.scheduled_date)?,
      notification_type: decode_notification_type(&self.notification_type)?,
      message:           self.message,
      sent:              self.sent,
      sent_at:           decode_opt_dt(self.sent_at)?,
      recipients:        serde_json::from_str(&self.recipients)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_sort_as_strings() {
    let a = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let b = a + chrono::TimeDelta::milliseconds(500);
    let c = a + chrono::TimeDelta::seconds(1);
    assert!(encode_dt(a) < encode_dt(b));
    assert!(encode_dt(b) < encode_dt(c));
    assert_eq!(decode_dt(&encode_dt(b)).unwrap(), b);
  }

  #[test]
  fn unknown_notification_type_is_a_decode_error() {
    assert!(matches!(
      decode_notification_type("2_weeks"),
      Err(Error::Decode { column: "notification_type", .. })
    ));
  }
}
