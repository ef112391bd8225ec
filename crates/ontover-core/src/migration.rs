//! Migration history and the coordinator that produces and applies it.
//!
//! The coordinator runs both script generators for a `(from, to, changes)`
//! triple, records the bundle in history before handing it back, and can
//! later apply it through a [`ScriptExecutor`]: relational script first, then
//! graph script. A graph failure after the relational script committed is
//! reported as [`Error::Execution`] and left for an operator; it is never
//! retried here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
  Error, Result,
  change::ChangeSet,
  events::{DomainEvent, EventSink, emit},
  executor::{ScriptExecutor, StoreKind},
  model::Catalog,
  scripts::{self, MigrationScripts},
  store::OntologyStore,
  version::{OntologyKey, SemVer},
};

// ─── History records ─────────────────────────────────────────────────────────

/// Where a recorded migration stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationStatus {
  /// Scripts generated and recorded, not yet applied.
  Generated,
  Applied,
  /// Applying stopped at `target`. If `target` is the graph store, the
  /// relational script has already committed.
  ApplyFailed { target: StoreKind },
  RolledBack,
  /// Rollback step `step` of the plan that touched this record failed
  /// against `target`.
  RollbackFailed { step: usize, target: StoreKind },
}

impl MigrationStatus {
  pub fn label(&self) -> &'static str {
    match self {
      Self::Generated => "generated",
      Self::Applied => "applied",
      Self::ApplyFailed { .. } => "apply_failed",
      Self::RolledBack => "rolled_back",
      Self::RollbackFailed { .. } => "rollback_failed",
    }
  }

  /// Recorded but not (fully) applied yet.
  pub fn is_pending(&self) -> bool {
    matches!(self, Self::Generated | Self::ApplyFailed { .. })
  }

  /// Whether this migration's effects are (at least partly) live.
  pub fn is_applied(&self) -> bool {
    matches!(self, Self::Applied | Self::RollbackFailed { .. })
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
  pub migration_id: Uuid,
  pub tenant_id:    Uuid,
  pub ontology:     String,
  pub scripts:      MigrationScripts,
  pub change_count: usize,
  pub status:       MigrationStatus,
  pub recorded_at:  DateTime<Utc>,
  pub applied_at:   Option<DateTime<Utc>>,
}

impl MigrationRecord {
  pub fn key(&self) -> OntologyKey { OntologyKey::new(self.tenant_id, self.ontology.clone()) }

  pub fn from_version(&self) -> &str { &self.scripts.from_version }

  pub fn to_version(&self) -> &str { &self.scripts.to_version }
}

// ─── Coordinator ─────────────────────────────────────────────────────────────

pub struct MigrationCoordinator<S, X> {
  store:    S,
  executor: X,
  events:   Arc<dyn EventSink>,
}

impl<S, X> MigrationCoordinator<S, X>
where
  S: OntologyStore,
  X: ScriptExecutor,
  Error: From<S::Error>,
{
  pub fn new(store: S, executor: X, events: Arc<dyn EventSink>) -> Self {
    Self { store, executor, events }
  }

  /// Generate the four scripts for `from → to` and record them in history.
  /// Both versions must already exist for `key`. At most one unapplied
  /// record may exist per `(key, from, to)`; a second is a conflict.
  pub async fn generate(
    &self,
    key: &OntologyKey,
    from_version: &str,
    to_version: &str,
    changes: &ChangeSet,
  ) -> Result<MigrationRecord> {
    from_version.parse::<SemVer>()?;
    to_version.parse::<SemVer>()?;
    if from_version == to_version {
      return Err(Error::Conflict(format!(
        "migration from {from_version} to itself"
      )));
    }
    let source = self
      .store
      .get_version(key, from_version)
      .await?
      .ok_or_else(|| Error::NotFound(format!("version {from_version} of {key}")))?;
    if self.store.get_version(key, to_version).await?.is_none() {
      return Err(Error::NotFound(format!("version {to_version} of {key}")));
    }

    let history = self.store.list_migrations(key).await?;
    if let Some(pending) = history.iter().find(|r| {
      r.status.is_pending() && r.from_version() == from_version && r.to_version() == to_version
    }) {
      return Err(Error::Conflict(format!(
        "migration {from_version} -> {to_version} of {key} is already recorded as {} ({})",
        pending.status.label(),
        pending.migration_id
      )));
    }

    let catalog = Catalog::from_model_json(&source.model_json)?;
    let scripts = scripts::generate(from_version, to_version, changes, &catalog)?;
    let record = MigrationRecord {
      migration_id: Uuid::new_v4(),
      tenant_id: key.tenant_id,
      ontology: key.ontology.clone(),
      scripts,
      change_count: changes.len(),
      status: MigrationStatus::Generated,
      recorded_at: Utc::now(),
      applied_at: None,
    };
    self.store.insert_migration(&record).await?;

    info!(
      ontology = %key,
      migration = %record.migration_id,
      from = from_version,
      to = to_version,
      changes = record.change_count,
      "migration recorded"
    );
    emit(self.events.as_ref(), DomainEvent::MigrationRecorded {
      migration_id: record.migration_id,
      tenant_id:    key.tenant_id,
      ontology:     key.ontology.clone(),
      from_version: from_version.to_owned(),
      to_version:   to_version.to_owned(),
    });
    Ok(record)
  }

  /// Apply a recorded migration: relational script, then graph script.
  pub async fn apply(&self, migration_id: Uuid) -> Result<MigrationRecord> {
    let mut record = self
      .store
      .get_migration(migration_id)
      .await?
      .ok_or_else(|| Error::NotFound(format!("migration {migration_id}")))?;

    if !matches!(
      record.status,
      MigrationStatus::Generated | MigrationStatus::ApplyFailed { .. }
    ) {
      return Err(Error::Conflict(format!(
        "migration {migration_id} is {}",
        record.status.label()
      )));
    }

    for (target, script) in [
      (StoreKind::Relational, &record.scripts.sql_script),
      (StoreKind::Graph, &record.scripts.cypher_script),
    ] {
      if let Err(e) = self.executor.execute(target, script).await {
        error!(
          migration = %migration_id,
          %target,
          error = %e,
          "migration script failed"
        );
        let status = MigrationStatus::ApplyFailed { target };
        self.store.set_migration_status(migration_id, status, None).await?;
        return Err(Error::Execution { step: 0, target, message: e.to_string() });
      }
    }

    let applied_at = Utc::now();
    self
      .store
      .set_migration_status(migration_id, MigrationStatus::Applied, Some(applied_at))
      .await?;
    record.status = MigrationStatus::Applied;
    record.applied_at = Some(applied_at);

    info!(migration = %migration_id, to = record.to_version(), "migration applied");
    emit(self.events.as_ref(), DomainEvent::MigrationApplied {
      migration_id,
      tenant_id: record.tenant_id,
      ontology: record.ontology.clone(),
      to_version: record.to_version().to_owned(),
    });
    Ok(record)
  }

  pub async fn get(&self, migration_id: Uuid) -> Result<MigrationRecord> {
    self
      .store
      .get_migration(migration_id)
      .await?
      .ok_or_else(|| Error::NotFound(format!("migration {migration_id}")))
  }

  pub async fn history(&self, key: &OntologyKey) -> Result<Vec<MigrationRecord>> {
    Ok(self.store.list_migrations(key).await?)
  }
}
