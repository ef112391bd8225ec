//! [`SqliteStore`]: the SQLite implementation of [`OntologyStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use ontover_core::{
  deprecation::{DeprecationNotification, DeprecationPolicy, PolicyStatus},
  migration::{MigrationRecord, MigrationStatus},
  store::OntologyStore,
  version::{Activation, NewVersion, OntologyKey, OntologyVersion},
};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use tracing::debug;
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    MIGRATION_COLUMNS, NOTIFICATION_COLUMNS, POLICY_COLUMNS, RawMigration, RawNotification,
    RawPolicy, RawVersion, VERSION_COLUMNS, encode_dt, encode_status, encode_uuid,
  },
  schema::SCHEMA,
};

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
  )
}

/// Load the notifications of one policy, in timeline order.
fn notifications_of(
  conn: &rusqlite::Connection,
  policy_id: &str,
) -> rusqlite::Result<Vec<RawNotification>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {NOTIFICATION_COLUMNS} FROM deprecation_notifications n
     WHERE n.policy_id = ?1 ORDER BY n.scheduled_date"
  ))?;
  stmt
    .query_map(rusqlite::params![policy_id], RawNotification::from_row)?
    .collect()
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// An ontover store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. All calls
/// are serialised on the connection's worker thread.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store; useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── OntologyStore impl ──────────────────────────────────────────────────────

impl OntologyStore for SqliteStore {
  type Error = Error;

  // ── Versions ──────────────────────────────────────────────────────────────

  async fn insert_version(&self, input: NewVersion) -> Result<OntologyVersion> {
    let version = OntologyVersion {
      id:            Uuid::new_v4(),
      tenant_id:     input.tenant_id,
      ontology_name: input.ontology_name,
      version:       input.version,
      model_json:    input.model_json,
      is_active:     false,
      created_at:    Utc::now(),
      created_by:    input.created_by,
      branch:        input.branch,
      published_at:  None,
    };

    let id_str     = encode_uuid(version.id);
    let tenant_str = encode_uuid(version.tenant_id);
    let name       = version.ontology_name.clone();
    let ver        = version.version.clone();
    let model      = version.model_json.clone();
    let at_str     = encode_dt(version.created_at);
    let created_by = version.created_by.clone();
    let branch     = version.branch.clone();

    let inserted = self
      .conn
      .call(move |conn| {
        match conn.execute(
          "INSERT INTO ontology_versions (
             id, tenant_id, ontology_name, version, model_json,
             is_active, created_at, created_by, branch
           ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8)",
          rusqlite::params![id_str, tenant_str, name, ver, model, at_str, created_by, branch],
        ) {
          Ok(_) => Ok(true),
          Err(e) if is_constraint_violation(&e) => Ok(false),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    if !inserted {
      return Err(Error::Core(ontover_core::Error::Conflict(format!(
        "version {} of {} already exists",
        version.version,
        version.key()
      ))));
    }
    Ok(version)
  }

  async fn get_version<'a>(
    &'a self,
    key: &'a OntologyKey,
    version: &'a str,
  ) -> Result<Option<OntologyVersion>> {
    let tenant_str = encode_uuid(key.tenant_id);
    let name = key.ontology.clone();
    let ver = version.to_owned();

    let raw: Option<RawVersion> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!(
              "SELECT {VERSION_COLUMNS} FROM ontology_versions
               WHERE tenant_id = ?1 AND ontology_name = ?2 AND version = ?3"
            ),
            rusqlite::params![tenant_str, name, ver],
            RawVersion::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawVersion::into_version).transpose()
  }

  async fn list_versions<'a>(&'a self, key: &'a OntologyKey) -> Result<Vec<OntologyVersion>> {
    let tenant_str = encode_uuid(key.tenant_id);
    let name = key.ontology.clone();

    let raws: Vec<RawVersion> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {VERSION_COLUMNS} FROM ontology_versions
           WHERE tenant_id = ?1 AND ontology_name = ?2
           ORDER BY created_at"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![tenant_str, name], RawVersion::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawVersion::into_version).collect()
  }

  async fn active_version<'a>(&'a self, key: &'a OntologyKey) -> Result<Option<OntologyVersion>> {
    let tenant_str = encode_uuid(key.tenant_id);
    let name = key.ontology.clone();

    let raw: Option<RawVersion> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!(
              "SELECT {VERSION_COLUMNS} FROM ontology_versions
               WHERE tenant_id = ?1 AND ontology_name = ?2 AND is_active = 1"
            ),
            rusqlite::params![tenant_str, name],
            RawVersion::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawVersion::into_version).transpose()
  }

  async fn activate<'a>(&'a self, key: &'a OntologyKey, version: &'a str) -> Result<Activation> {
    let tenant_str = encode_uuid(key.tenant_id);
    let name = key.ontology.clone();
    let ver = version.to_owned();
    let now = Utc::now();
    let now_str = encode_dt(now);

    // Deactivate and activate inside one IMMEDIATE transaction so no other
    // writer can observe (or create) a second active row in between.
    let swapped: Option<(RawVersion, Option<String>)> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let target = tx
          .query_row(
            &format!(
              "SELECT {VERSION_COLUMNS} FROM ontology_versions
               WHERE tenant_id = ?1 AND ontology_name = ?2 AND version = ?3"
            ),
            rusqlite::params![tenant_str, name, ver],
            RawVersion::from_row,
          )
          .optional()?;
        let Some(mut target) = target else {
          return Ok(None);
        };

        let previous: Option<String> = tx
          .query_row(
            "SELECT version FROM ontology_versions
             WHERE tenant_id = ?1 AND ontology_name = ?2 AND is_active = 1",
            rusqlite::params![tenant_str, name],
            |r| r.get(0),
          )
          .optional()?;

        tx.execute(
          "UPDATE ontology_versions SET is_active = 0
           WHERE tenant_id = ?1 AND ontology_name = ?2 AND is_active = 1",
          rusqlite::params![tenant_str, name],
        )?;
        tx.execute(
          "UPDATE ontology_versions SET is_active = 1, published_at = ?2 WHERE id = ?1",
          rusqlite::params![target.id, now_str],
        )?;
        tx.commit()?;

        target.is_active = true;
        target.published_at = Some(now_str);
        Ok(Some((target, previous)))
      })
      .await?;

    let Some((raw, previous)) = swapped else {
      return Err(Error::Core(ontover_core::Error::NotFound(format!(
        "version {version} of {key}"
      ))));
    };
    debug!(ontology = %key, version, previous = ?previous, "activation committed");
    Ok(Activation { activated: raw.into_version()?, previous })
  }

  // ── Migration history ─────────────────────────────────────────────────────

  async fn insert_migration<'a>(&'a self, record: &'a MigrationRecord) -> Result<()> {
    let id_str       = encode_uuid(record.migration_id);
    let tenant_str   = encode_uuid(record.tenant_id);
    let name         = record.ontology.clone();
    let scripts      = record.scripts.clone();
    let generated    = encode_dt(scripts.generated_at);
    let change_count = i64::try_from(record.change_count).unwrap_or(i64::MAX);
    let label        = record.status.label();
    let status_json  = encode_status(&record.status)?;
    let recorded     = encode_dt(record.recorded_at);
    let applied      = record.applied_at.map(encode_dt);

    let inserted = self
      .conn
      .call(move |conn| {
        match conn.execute(
          "INSERT INTO migrations (
             migration_id, tenant_id, ontology_name, from_version, to_version,
             sql_script, sql_rollback_script, cypher_script, cypher_rollback_script,
             generated_at, change_count, status, status_json, recorded_at, applied_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
          rusqlite::params![
            id_str,
            tenant_str,
            name,
            scripts.from_version,
            scripts.to_version,
            scripts.sql_script,
            scripts.sql_rollback_script,
            scripts.cypher_script,
            scripts.cypher_rollback_script,
            generated,
            change_count,
            label,
            status_json,
            recorded,
            applied,
          ],
        ) {
          Ok(_) => Ok(true),
          Err(e) if is_constraint_violation(&e) => Ok(false),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    if !inserted {
      return Err(Error::Core(ontover_core::Error::Conflict(format!(
        "migration {} -> {} of {} is already recorded",
        record.from_version(),
        record.to_version(),
        record.key()
      ))));
    }
    Ok(())
  }

  async fn get_migration(&self, migration_id: Uuid) -> Result<Option<MigrationRecord>> {
    let id_str = encode_uuid(migration_id);

    let raw: Option<RawMigration> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {MIGRATION_COLUMNS} FROM migrations WHERE migration_id = ?1"),
            rusqlite::params![id_str],
            RawMigration::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawMigration::into_record).transpose()
  }

  async fn list_migrations<'a>(&'a self, key: &'a OntologyKey) -> Result<Vec<MigrationRecord>> {
    let tenant_str = encode_uuid(key.tenant_id);
    let name = key.ontology.clone();

    let raws: Vec<RawMigration> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {MIGRATION_COLUMNS} FROM migrations
           WHERE tenant_id = ?1 AND ontology_name = ?2
           ORDER BY applied_at IS NULL, applied_at DESC, recorded_at DESC"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![tenant_str, name], RawMigration::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawMigration::into_record).collect()
  }

  async fn set_migration_status(
    &self,
    migration_id: Uuid,
    status: MigrationStatus,
    applied_at: Option<DateTime<Utc>>,
  ) -> Result<()> {
    let id_str = encode_uuid(migration_id);
    let label = status.label();
    let status_json = encode_status(&status)?;
    let applied = applied_at.map(encode_dt);

    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE migrations
           SET status = ?2, status_json = ?3, applied_at = COALESCE(?4, applied_at)
           WHERE migration_id = ?1",
          rusqlite::params![id_str, label, status_json, applied],
        )?)
      })
      .await?;

    if updated == 0 {
      return Err(Error::Core(ontover_core::Error::NotFound(format!(
        "migration {migration_id}"
      ))));
    }
    Ok(())
  }

  // ── Deprecations ──────────────────────────────────────────────────────────

  async fn insert_policy<'a>(&'a self, policy: &'a DeprecationPolicy) -> Result<()> {
    let policy_row = (
      encode_uuid(policy.policy_id),
      encode_uuid(policy.tenant_id),
      encode_uuid(policy.change_id),
      encode_dt(policy.scheduled_at),
      encode_dt(policy.deprecation_date),
      policy.status.to_string(),
      policy.completed_at.map(encode_dt),
      policy.deprecated_entity_name.clone(),
      policy.replacement_entity_name.clone(),
    );
    let notification_rows = policy
      .notifications
      .iter()
      .map(|n| -> Result<_> {
        Ok((
          encode_uuid(n.notification_id),
          encode_uuid(n.policy_id),
          encode_dt(n.scheduled_date),
          n.notification_type.to_string(),
          n.message.clone(),
          n.sent,
          n.sent_at.map(encode_dt),
          serde_json::to_string(&n.recipients)?,
        ))
      })
      .collect::<Result<Vec<_>>>()?;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let (id, tenant, change, scheduled, deprecation, status, completed, entity, replacement) =
          policy_row;
        tx.execute(
          "INSERT INTO deprecation_policies (
             policy_id, tenant_id, change_id, scheduled_at, deprecation_date,
             status, completed_at, deprecated_entity_name, replacement_entity_name
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
          rusqlite::params![
            id,
            tenant,
            change,
            scheduled,
            deprecation,
            status,
            completed,
            entity,
            replacement
          ],
        )?;
        {
          let mut stmt = tx.prepare(
            "INSERT INTO deprecation_notifications (
               notification_id, policy_id, scheduled_date, notification_type,
               message, sent, sent_at, recipients
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          )?;
          for (nid, pid, date, kind, message, sent, sent_at, recipients) in notification_rows {
            stmt.execute(rusqlite::params![
              nid, pid, date, kind, message, sent, sent_at, recipients
            ])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_policy(&self, policy_id: Uuid) -> Result<Option<DeprecationPolicy>> {
    let id_str = encode_uuid(policy_id);

    let raw: Option<(RawPolicy, Vec<RawNotification>)> = self
      .conn
      .call(move |conn| {
        let policy = conn
          .query_row(
            &format!("SELECT {POLICY_COLUMNS} FROM deprecation_policies WHERE policy_id = ?1"),
            rusqlite::params![id_str],
            RawPolicy::from_row,
          )
          .optional()?;
        let Some(policy) = policy else {
          return Ok(None);
        };
        let notifications = notifications_of(conn, &policy.policy_id)?;
        Ok(Some((policy, notifications)))
      })
      .await?;

    raw.map(|(p, n)| p.into_policy(n)).transpose()
  }

  async fn list_policies(&self, tenant_id: Uuid) -> Result<Vec<DeprecationPolicy>> {
    let tenant_str = encode_uuid(tenant_id);

    let raws: Vec<(RawPolicy, Vec<RawNotification>)> = self
      .conn
      .call(move |conn| {
        let policies = {
          let mut stmt = conn.prepare(&format!(
            "SELECT {POLICY_COLUMNS} FROM deprecation_policies
             WHERE tenant_id = ?1 ORDER BY scheduled_at"
          ))?;
          stmt
            .query_map(rusqlite::params![tenant_str], RawPolicy::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        let mut out = Vec::with_capacity(policies.len());
        for policy in policies {
          let notifications = notifications_of(conn, &policy.policy_id)?;
          out.push((policy, notifications));
        }
        Ok(out)
      })
      .await?;

    raws.into_iter().map(|(p, n)| p.into_policy(n)).collect()
  }

  async fn due_notifications(&self, as_of: DateTime<Utc>) -> Result<Vec<DeprecationNotification>> {
    let as_of_str = encode_dt(as_of);
    let scheduled = PolicyStatus::Scheduled.to_string();

    let raws: Vec<RawNotification> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {NOTIFICATION_COLUMNS}
           FROM deprecation_notifications n
           JOIN deprecation_policies p ON p.policy_id = n.policy_id
           WHERE n.sent = 0 AND n.scheduled_date <= ?1 AND p.status = ?2
           ORDER BY n.scheduled_date"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![as_of_str, scheduled], RawNotification::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawNotification::into_notification).collect()
  }

  async fn mark_notification_sent(
    &self,
    notification_id: Uuid,
    sent_at: DateTime<Utc>,
  ) -> Result<bool> {
    let id_str = encode_uuid(notification_id);
    let at_str = encode_dt(sent_at);

    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE deprecation_notifications SET sent = 1, sent_at = ?2
           WHERE notification_id = ?1 AND sent = 0",
          rusqlite::params![id_str, at_str],
        )?)
      })
      .await?;
    Ok(updated == 1)
  }

  async fn complete_policy(&self, policy_id: Uuid, completed_at: DateTime<Utc>) -> Result<bool> {
    let id_str = encode_uuid(policy_id);
    let at_str = encode_dt(completed_at);
    let completed = PolicyStatus::Completed.to_string();
    let scheduled = PolicyStatus::Scheduled.to_string();

    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE deprecation_policies SET status = ?2, completed_at = ?3
           WHERE policy_id = ?1 AND status = ?4",
          rusqlite::params![id_str, completed, at_str, scheduled],
        )?)
      })
      .await?;
    Ok(updated == 1)
  }
}
