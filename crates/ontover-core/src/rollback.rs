//! Rollback planning, execution and verification.
//!
//! A plan walks migration history backwards from the active version: each
//! step is the most recently applied migration whose target is the version
//! reached so far, and it uses that migration's own recorded rollback
//! scripts. Steps run strictly in order, relational script first; the first
//! failure stops the sequence and is recorded on the migration it hit. When
//! earlier steps had already completed, the registry is moved to the version
//! they restored, so a retry plans from where the stores actually are.

use std::{collections::HashSet, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  events::{DomainEvent, EventSink, emit},
  executor::{ScriptExecutor, StoreKind},
  migration::{MigrationRecord, MigrationStatus},
  store::OntologyStore,
  version::{OntologyKey, OntologyVersion},
};

/// Fixed per-step duration estimate.
pub const STEP_ESTIMATE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackStep {
  pub index:              usize,
  pub migration_id:       Uuid,
  /// The version this step leaves behind.
  pub from_version:       String,
  /// The version this step restores.
  pub to_version:         String,
  pub description:        String,
  pub sql_script:         String,
  pub cypher_script:      String,
  pub estimated_duration: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPlan {
  pub key:                OntologyKey,
  pub current_version:    String,
  pub target_version:     String,
  pub steps:              Vec<RollbackStep>,
  pub estimated_duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RollbackOutcome {
  /// The target was already active; nothing ran.
  AlreadyActive { version: String },
  RolledBack {
    from_version:  String,
    to_version:    String,
    steps_applied: usize,
  },
}

/// Build a plan from `history` (most recently applied first).
///
/// Only migrations whose effects are live are considered. Each migration is
/// used at most once, so a cyclic history cannot loop.
pub fn plan_from_history(
  key: &OntologyKey,
  current_version: &str,
  target_version: &str,
  history: &[MigrationRecord],
) -> Result<RollbackPlan> {
  if current_version == target_version {
    return Err(Error::Conflict(format!(
      "{target_version} is already the active version of {key}"
    )));
  }

  let mut used: HashSet<Uuid> = HashSet::new();
  let mut steps = Vec::new();
  let mut cursor = current_version.to_owned();

  while cursor != target_version {
    let Some(record) = history.iter().find(|r| {
      r.status.is_applied() && r.to_version() == cursor && !used.contains(&r.migration_id)
    }) else {
      return Err(Error::NotFound(format!(
        "applied migration path from {current_version} to {target_version} for {key} \
         (no applied migration into {cursor})"
      )));
    };

    used.insert(record.migration_id);
    steps.push(RollbackStep {
      index:              steps.len(),
      migration_id:       record.migration_id,
      from_version:       record.to_version().to_owned(),
      to_version:         record.from_version().to_owned(),
      description:        format!(
        "revert {} -> {} (migration {})",
        record.to_version(),
        record.from_version(),
        record.migration_id
      ),
      sql_script:         record.scripts.sql_rollback_script.clone(),
      cypher_script:      record.scripts.cypher_rollback_script.clone(),
      estimated_duration: STEP_ESTIMATE,
    });
    cursor = record.from_version().to_owned();
  }

  let estimated_duration = steps.iter().map(|s| s.estimated_duration).sum();
  Ok(RollbackPlan {
    key: key.clone(),
    current_version: current_version.to_owned(),
    target_version: target_version.to_owned(),
    steps,
    estimated_duration,
  })
}

// ─── Manager ─────────────────────────────────────────────────────────────────

pub struct RollbackManager<S, X> {
  store:    S,
  executor: X,
  events:   Arc<dyn EventSink>,
}

impl<S, X> RollbackManager<S, X>
where
  S: OntologyStore,
  X: ScriptExecutor,
  Error: From<S::Error>,
{
  pub fn new(store: S, executor: X, events: Arc<dyn EventSink>) -> Self {
    Self { store, executor, events }
  }

  async fn require_active(&self, key: &OntologyKey) -> Result<OntologyVersion> {
    self
      .store
      .active_version(key)
      .await?
      .ok_or_else(|| Error::NotFound(format!("active version of {key}")))
  }

  /// Plan a rollback of `key` to `target_version` without running anything.
  pub async fn generate_rollback_plan(
    &self,
    key: &OntologyKey,
    target_version: &str,
  ) -> Result<RollbackPlan> {
    let active = self.require_active(key).await?;
    if self.store.get_version(key, target_version).await?.is_none() {
      return Err(Error::NotFound(format!("version {target_version} of {key}")));
    }
    let history = self.store.list_migrations(key).await?;
    plan_from_history(key, &active.version, target_version, &history)
  }

  /// Roll `key` back to `target_version`, then verify the result.
  pub async fn rollback_to_version(
    &self,
    key: &OntologyKey,
    target_version: &str,
  ) -> Result<RollbackOutcome> {
    let active = self.require_active(key).await?;
    if active.version == target_version {
      info!(ontology = %key, version = target_version, "rollback target already active");
      return Ok(RollbackOutcome::AlreadyActive { version: active.version });
    }

    let plan = self.generate_rollback_plan(key, target_version).await?;
    info!(
      ontology = %key,
      from = %plan.current_version,
      to = target_version,
      steps = plan.steps.len(),
      estimate_secs = plan.estimated_duration.as_secs(),
      "starting rollback"
    );

    for step in &plan.steps {
      if let Err(e) = self.run_step(step).await {
        self.settle_partial(key, &plan, step.index).await;
        return Err(e);
      }
    }

    self.store.activate(key, target_version).await?;
    self.verify_rollback(key, target_version).await?;

    info!(ontology = %key, version = target_version, "rollback complete");
    emit(self.events.as_ref(), DomainEvent::RolledBack {
      tenant_id:    key.tenant_id,
      ontology:     key.ontology.clone(),
      from_version: plan.current_version.clone(),
      to_version:   target_version.to_owned(),
      steps:        plan.steps.len(),
    });
    Ok(RollbackOutcome::RolledBack {
      from_version:  plan.current_version,
      to_version:    target_version.to_owned(),
      steps_applied: plan.steps.len(),
    })
  }

  /// After step `failed` stopped the run, activate the version restored by
  /// the last completed step. Nothing moves if the first step failed.
  async fn settle_partial(&self, key: &OntologyKey, plan: &RollbackPlan, failed: usize) {
    let Some(reached) = failed.checked_sub(1).and_then(|i| plan.steps.get(i)) else {
      return;
    };
    match self.store.activate(key, &reached.to_version).await {
      Ok(_) => warn!(
        ontology = %key,
        active = %reached.to_version,
        target = %plan.target_version,
        failed_step = failed,
        "rollback stopped part way; active version moved to the last restored version"
      ),
      Err(e) => {
        let e = Error::from(e);
        error!(
          ontology = %key,
          reached = %reached.to_version,
          error = %e,
          "could not record partial rollback; registry and stores disagree"
        );
      }
    }
  }

  async fn run_step(&self, step: &RollbackStep) -> Result<()> {
    for (target, script) in [
      (StoreKind::Relational, &step.sql_script),
      (StoreKind::Graph, &step.cypher_script),
    ] {
      if let Err(e) = self.executor.execute(target, script).await {
        error!(
          step = step.index,
          migration = %step.migration_id,
          %target,
          error = %e,
          "rollback step failed; remaining steps skipped"
        );
        let status = MigrationStatus::RollbackFailed { step: step.index, target };
        if let Err(mark) = self.store.set_migration_status(step.migration_id, status, None).await
        {
          let mark = Error::from(mark);
          error!(
            migration = %step.migration_id,
            error = %mark,
            "could not record rollback failure"
          );
        }
        return Err(Error::Execution {
          step: step.index,
          target,
          message: e.to_string(),
        });
      }
    }

    self
      .store
      .set_migration_status(step.migration_id, MigrationStatus::RolledBack, None)
      .await?;
    info!(step = step.index, description = %step.description, "rollback step complete");
    Ok(())
  }

  /// Re-read the active version and require it to be `expected_version`.
  pub async fn verify_rollback(
    &self,
    key: &OntologyKey,
    expected_version: &str,
  ) -> Result<OntologyVersion> {
    let active = self.store.active_version(key).await?;
    match active {
      Some(v) if v.version == expected_version => Ok(v),
      other => {
        let actual = other.map(|v| v.version);
        error!(
          ontology = %key,
          expected = expected_version,
          actual = actual.as_deref().unwrap_or("none"),
          "rollback verification failed; operator attention required"
        );
        Err(Error::Verification {
          expected: expected_version.to_owned(),
          actual,
        })
      }
    }
  }
}
