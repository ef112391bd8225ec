//! Integration tests for `SqliteStore` and the core services running on top
//! of it, against an in-memory database.

use std::sync::{
  Arc, Mutex,
  atomic::{AtomicBool, Ordering},
};

use chrono::{Months, TimeZone, Utc};
use ontover_core::{
  Error as CoreError,
  change::{ChangeSet, ChangeType, OntologyChange},
  deprecation::{
    DeprecationManager, DeprecationPhase, Notice, NotificationDispatcher, NotificationType,
    PolicyStatus,
  },
  events::{DomainEvent, EventSink},
  executor::{ScriptExecutor, StoreKind},
  lifecycle::VersionLifecycle,
  migration::{MigrationCoordinator, MigrationRecord, MigrationStatus},
  rollback::{RollbackManager, RollbackOutcome, STEP_ESTIMATE},
  store::OntologyStore,
  version::{NewVersion, OntologyKey},
};
use uuid::Uuid;

use crate::SqliteStore;

const TENANT: Uuid = Uuid::from_u128(0x0b5e_55ed);

const MODEL: &str = r#"{
  "entities": [
    {"name": "Lender", "properties": [{"name": "name", "type": "string"}]}
  ]
}"#;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn key() -> OntologyKey { OntologyKey::new(TENANT, "lending") }

fn new_version(version: &str) -> NewVersion { NewVersion::new(&key(), version, MODEL, "alice") }

// ─── Fakes ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct FakeError(String);

#[derive(Default)]
struct ExecState {
  ran:  Vec<(StoreKind, String)>,
  /// Fail any script for this target that contains the marker text.
  fail: Option<(StoreKind, &'static str)>,
}

#[derive(Clone, Default)]
struct FakeExecutor {
  state: Arc<Mutex<ExecState>>,
}

impl FakeExecutor {
  fn fail_on(&self, target: StoreKind, marker: &'static str) {
    self.state.lock().unwrap().fail = Some((target, marker));
  }

  fn heal(&self) { self.state.lock().unwrap().fail = None; }

  fn ran(&self) -> Vec<(StoreKind, String)> { self.state.lock().unwrap().ran.clone() }
}

impl ScriptExecutor for FakeExecutor {
  type Error = FakeError;

  async fn execute<'a>(&'a self, target: StoreKind, script: &'a str) -> Result<(), FakeError> {
    let mut state = self.state.lock().unwrap();
    if let Some((t, marker)) = state.fail
      && t == target
      && script.contains(marker)
    {
      return Err(FakeError(format!("{target} store rejected the script")));
    }
    state.ran.push((target, script.to_owned()));
    Ok(())
  }
}

#[derive(Clone, Default)]
struct FakeDispatcher {
  sent: Arc<Mutex<Vec<Notice>>>,
  down: Arc<AtomicBool>,
}

impl NotificationDispatcher for FakeDispatcher {
  type Error = FakeError;

  async fn dispatch<'a>(&'a self, notice: &'a Notice) -> Result<(), FakeError> {
    if self.down.load(Ordering::SeqCst) {
      return Err(FakeError("smtp unavailable".into()));
    }
    self.sent.lock().unwrap().push(notice.clone());
    Ok(())
  }
}

#[derive(Default)]
struct CollectingSink(Mutex<Vec<DomainEvent>>);

impl CollectingSink {
  fn names(&self) -> Vec<&'static str> {
    self.0.lock().unwrap().iter().map(DomainEvent::name).collect()
  }
}

impl EventSink for CollectingSink {
  fn publish(&self, event: &DomainEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    self.0.lock().unwrap().push(event.clone());
    Ok(())
  }
}

struct FailingSink;

impl EventSink for FailingSink {
  fn publish(&self, _: &DomainEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    Err("event bus unreachable".into())
  }
}

// ─── Versions ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_stores_inactive_version() {
  let s = store().await;
  let created = s.insert_version(new_version("1.0.0")).await.unwrap();
  assert!(!created.is_active);

  let fetched = s.get_version(&key(), "1.0.0").await.unwrap().unwrap();
  assert_eq!(fetched.id, created.id);
  assert_eq!(fetched.model_json, MODEL);
  assert_eq!(fetched.branch, "main");
  assert!(fetched.published_at.is_none());
}

#[tokio::test]
async fn duplicate_version_conflicts() {
  let lifecycle = VersionLifecycle::new(store().await, Arc::new(CollectingSink::default()));
  lifecycle.create(new_version("1.0.0")).await.unwrap();

  let err = lifecycle.create(new_version("1.0.0")).await.unwrap_err();
  assert!(matches!(err, CoreError::Conflict(_)), "{err}");
}

#[tokio::test]
async fn same_version_string_is_independent_per_ontology() {
  let s = store().await;
  s.insert_version(new_version("1.0.0")).await.unwrap();

  let other = OntologyKey::new(TENANT, "insurance");
  s.insert_version(NewVersion::new(&other, "1.0.0", MODEL, "bob"))
    .await
    .unwrap();
  assert_eq!(s.list_versions(&key()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn create_rejects_non_semver() {
  let lifecycle = VersionLifecycle::new(store().await, Arc::new(CollectingSink::default()));
  let err = lifecycle.create(new_version("1.0")).await.unwrap_err();
  assert!(matches!(err, CoreError::InvalidVersion(_)));
}

#[tokio::test]
async fn upload_blocks_invalid_models() {
  let s = store().await;
  let lifecycle = VersionLifecycle::new(s.clone(), Arc::new(CollectingSink::default()));

  let bad = NewVersion::new(&key(), "1.0.0", r#"{"entities": []}"#, "alice");
  let err = lifecycle.upload(bad).await.unwrap_err();
  assert!(matches!(err, CoreError::Validation(_)));
  assert!(s.list_versions(&key()).await.unwrap().is_empty());
}

#[tokio::test]
async fn publish_swaps_the_active_version() {
  let sink = Arc::new(CollectingSink::default());
  let s = store().await;
  let lifecycle = VersionLifecycle::new(s.clone(), sink.clone());
  lifecycle.create(new_version("1.0.0")).await.unwrap();
  lifecycle.create(new_version("1.1.0")).await.unwrap();

  let first = lifecycle.publish(&key(), "1.0.0").await.unwrap();
  assert_eq!(first.previous, None);

  let second = lifecycle.publish(&key(), "1.1.0").await.unwrap();
  assert_eq!(second.previous.as_deref(), Some("1.0.0"));
  assert!(second.activated.is_active);
  assert!(second.activated.published_at.is_some());

  let active = lifecycle.active(&key()).await.unwrap().unwrap();
  assert_eq!(active.version, "1.1.0");
  assert!(!lifecycle.get(&key(), "1.0.0").await.unwrap().is_active);

  assert_eq!(sink.names(), vec![
    "version_created",
    "version_created",
    "version_published",
    "version_published",
  ]);
}

#[tokio::test]
async fn publish_unknown_version_is_not_found_and_keeps_active() {
  let s = store().await;
  let lifecycle = VersionLifecycle::new(s.clone(), Arc::new(CollectingSink::default()));
  lifecycle.create(new_version("1.0.0")).await.unwrap();
  lifecycle.publish(&key(), "1.0.0").await.unwrap();

  let err = lifecycle.publish(&key(), "2.0.0").await.unwrap_err();
  assert!(matches!(err, CoreError::NotFound(_)));
  assert_eq!(s.active_version(&key()).await.unwrap().unwrap().version, "1.0.0");
}

#[tokio::test]
async fn concurrent_publishes_leave_exactly_one_active() {
  let s = store().await;
  for v in ["1.0.0", "1.1.0", "1.2.0"] {
    s.insert_version(new_version(v)).await.unwrap();
  }

  let k = key();
  let (a, b, c) = tokio::join!(
    s.activate(&k, "1.0.0"),
    s.activate(&k, "1.1.0"),
    s.activate(&k, "1.2.0"),
  );
  a.unwrap();
  b.unwrap();
  c.unwrap();

  let active: Vec<_> = s
    .list_versions(&k)
    .await
    .unwrap()
    .into_iter()
    .filter(|v| v.is_active)
    .collect();
  assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn list_orders_by_semantic_version() {
  let lifecycle = VersionLifecycle::new(store().await, Arc::new(CollectingSink::default()));
  for v in ["1.10.0", "1.2.0", "1.9.3"] {
    lifecycle.create(new_version(v)).await.unwrap();
  }
  let versions: Vec<String> = lifecycle
    .list(&key())
    .await
    .unwrap()
    .into_iter()
    .map(|v| v.version)
    .collect();
  assert_eq!(versions, vec!["1.2.0", "1.9.3", "1.10.0"]);
}

#[tokio::test]
async fn event_sink_failure_does_not_fail_the_operation() {
  let lifecycle = VersionLifecycle::new(store().await, Arc::new(FailingSink));
  lifecycle.create(new_version("1.0.0")).await.unwrap();
  lifecycle.publish(&key(), "1.0.0").await.unwrap();
}

// ─── Migrations ──────────────────────────────────────────────────────────────

fn add_rate() -> ChangeSet {
  ChangeSet::new(vec![
    OntologyChange::new(ChangeType::PropertyAdded, "Lender")
      .with_property("rate")
      .with_new("decimal"),
  ])
}

fn add_broker() -> ChangeSet {
  ChangeSet::new(vec![OntologyChange::new(ChangeType::EntityAdded, "Broker")])
}

struct Harness {
  store:    SqliteStore,
  executor: FakeExecutor,
  sink:     Arc<CollectingSink>,
}

impl Harness {
  async fn new(versions: &[&str]) -> Self {
    let store = store().await;
    for v in versions {
      store.insert_version(new_version(v)).await.unwrap();
    }
    Self {
      store,
      executor: FakeExecutor::default(),
      sink: Arc::new(CollectingSink::default()),
    }
  }

  fn coordinator(&self) -> MigrationCoordinator<SqliteStore, FakeExecutor> {
    MigrationCoordinator::new(self.store.clone(), self.executor.clone(), self.sink.clone())
  }

  fn rollback(&self) -> RollbackManager<SqliteStore, FakeExecutor> {
    RollbackManager::new(self.store.clone(), self.executor.clone(), self.sink.clone())
  }

  /// Generate and apply `from -> to`, then publish `to`.
  async fn migrate(&self, from: &str, to: &str, changes: &ChangeSet) -> MigrationRecord {
    let coordinator = self.coordinator();
    let record = coordinator.generate(&key(), from, to, changes).await.unwrap();
    let applied = coordinator.apply(record.migration_id).await.unwrap();
    self.store.activate(&key(), to).await.unwrap();
    applied
  }

  async fn status(&self, id: Uuid) -> MigrationStatus {
    self.store.get_migration(id).await.unwrap().unwrap().status
  }
}

#[tokio::test]
async fn generate_records_all_four_scripts() {
  let h = Harness::new(&["1.0.0", "1.1.0"]).await;
  let record = h
    .coordinator()
    .generate(&key(), "1.0.0", "1.1.0", &add_rate())
    .await
    .unwrap();

  assert_eq!(record.status, MigrationStatus::Generated);
  assert_eq!(record.change_count, 1);
  assert!(record.scripts.sql_script.contains("ADD COLUMN IF NOT EXISTS \"rate\""));
  assert!(record.scripts.sql_rollback_script.contains("DROP COLUMN IF EXISTS \"rate\""));
  assert!(!record.scripts.cypher_script.is_empty());
  assert!(!record.scripts.cypher_rollback_script.is_empty());

  let stored = h.store.get_migration(record.migration_id).await.unwrap().unwrap();
  assert_eq!(stored.scripts, record.scripts);
  assert!(h.executor.ran().is_empty());
  assert_eq!(h.sink.names(), vec!["migration_recorded"]);
}

#[tokio::test]
async fn generate_requires_both_versions() {
  let h = Harness::new(&["1.0.0"]).await;
  let err = h
    .coordinator()
    .generate(&key(), "1.0.0", "1.1.0", &add_rate())
    .await
    .unwrap_err();
  assert!(matches!(err, CoreError::NotFound(_)));
  assert!(h.store.list_migrations(&key()).await.unwrap().is_empty());
}

#[tokio::test]
async fn apply_runs_relational_then_graph() {
  let h = Harness::new(&["1.0.0", "1.1.0"]).await;
  let coordinator = h.coordinator();
  let record = coordinator
    .generate(&key(), "1.0.0", "1.1.0", &add_rate())
    .await
    .unwrap();

  let applied = coordinator.apply(record.migration_id).await.unwrap();
  assert_eq!(applied.status, MigrationStatus::Applied);
  assert!(applied.applied_at.is_some());

  let ran = h.executor.ran();
  assert_eq!(ran.len(), 2);
  assert_eq!(ran[0], (StoreKind::Relational, record.scripts.sql_script.clone()));
  assert_eq!(ran[1], (StoreKind::Graph, record.scripts.cypher_script.clone()));

  let err = coordinator.apply(record.migration_id).await.unwrap_err();
  assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn graph_failure_marks_apply_failed_and_can_be_retried() {
  let h = Harness::new(&["1.0.0", "1.1.0"]).await;
  let coordinator = h.coordinator();
  let record = coordinator
    .generate(&key(), "1.0.0", "1.1.0", &add_rate())
    .await
    .unwrap();

  h.executor.fail_on(StoreKind::Graph, "migration 1.0.0 -> 1.1.0");
  let err = coordinator.apply(record.migration_id).await.unwrap_err();
  assert!(
    matches!(err, CoreError::Execution { step: 0, target: StoreKind::Graph, .. }),
    "{err}"
  );
  assert_eq!(h.executor.ran().len(), 1, "relational script already ran");
  assert_eq!(
    h.status(record.migration_id).await,
    MigrationStatus::ApplyFailed { target: StoreKind::Graph }
  );

  h.executor.heal();
  coordinator.apply(record.migration_id).await.unwrap();
  assert_eq!(h.status(record.migration_id).await, MigrationStatus::Applied);
}

#[tokio::test]
async fn history_lists_most_recently_applied_first() {
  let h = Harness::new(&["1.0.0", "1.1.0", "1.2.0"]).await;
  let first = h.migrate("1.0.0", "1.1.0", &add_rate()).await;
  let second = h.migrate("1.1.0", "1.2.0", &add_broker()).await;
  let pending = h
    .coordinator()
    .generate(&key(), "1.0.0", "1.2.0", &add_broker())
    .await
    .unwrap();

  let ids: Vec<Uuid> = h
    .coordinator()
    .history(&key())
    .await
    .unwrap()
    .into_iter()
    .map(|r| r.migration_id)
    .collect();
  assert_eq!(ids, vec![second.migration_id, first.migration_id, pending.migration_id]);
}

#[tokio::test]
async fn entity_rename_moves_indexes_declared_in_the_source_model() {
  let h = Harness::new(&["1.0.0", "1.1.0"]).await;
  let rename = ChangeSet::new(vec![
    OntologyChange::new(ChangeType::EntityRenamed, "Creditor")
      .with_old("Lender")
      .with_new("Creditor"),
  ]);
  let record = h
    .coordinator()
    .generate(&key(), "1.0.0", "1.1.0", &rename)
    .await
    .unwrap();

  let up = &record.scripts.cypher_script;
  assert!(up.contains("DROP INDEX `lender_name_idx` IF EXISTS"), "{up}");
  assert!(up.contains("CREATE INDEX `creditor_name_idx` IF NOT EXISTS"), "{up}");
  let down = &record.scripts.cypher_rollback_script;
  assert!(down.contains("CREATE INDEX `lender_name_idx` IF NOT EXISTS"), "{down}");
}

#[tokio::test]
async fn pending_migration_for_the_same_versions_conflicts() {
  let h = Harness::new(&["1.0.0", "1.1.0"]).await;
  let coordinator = h.coordinator();
  let first = coordinator
    .generate(&key(), "1.0.0", "1.1.0", &add_rate())
    .await
    .unwrap();

  let err = coordinator
    .generate(&key(), "1.0.0", "1.1.0", &add_rate())
    .await
    .unwrap_err();
  assert!(matches!(err, CoreError::Conflict(_)), "{err}");

  // The store enforces the same rule on its own.
  let mut copy = first.clone();
  copy.migration_id = Uuid::new_v4();
  let err = CoreError::from(h.store.insert_migration(&copy).await.unwrap_err());
  assert!(matches!(err, CoreError::Conflict(_)), "{err}");
  assert_eq!(h.store.list_migrations(&key()).await.unwrap().len(), 1);

  // Once applied, the same interval may be recorded again.
  coordinator.apply(first.migration_id).await.unwrap();
  coordinator
    .generate(&key(), "1.0.0", "1.1.0", &add_rate())
    .await
    .unwrap();
}

// ─── Rollback ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rollback_to_active_version_is_a_no_op() {
  let h = Harness::new(&["1.0.0", "1.1.0"]).await;
  h.migrate("1.0.0", "1.1.0", &add_rate()).await;
  let before = h.executor.ran().len();

  let outcome = h.rollback().rollback_to_version(&key(), "1.1.0").await.unwrap();
  assert_eq!(outcome, RollbackOutcome::AlreadyActive { version: "1.1.0".into() });
  assert_eq!(h.executor.ran().len(), before);
}

#[tokio::test]
async fn rollback_plan_walks_history_backwards() {
  let h = Harness::new(&["1.0.0", "1.1.0", "1.2.0"]).await;
  let first = h.migrate("1.0.0", "1.1.0", &add_rate()).await;
  let second = h.migrate("1.1.0", "1.2.0", &add_broker()).await;

  let plan = h.rollback().generate_rollback_plan(&key(), "1.0.0").await.unwrap();
  assert_eq!(plan.current_version, "1.2.0");
  assert_eq!(plan.steps.len(), 2);
  assert_eq!(plan.steps[0].migration_id, second.migration_id);
  assert_eq!(plan.steps[1].migration_id, first.migration_id);
  assert_eq!(plan.estimated_duration, STEP_ESTIMATE * 2);
}

#[tokio::test]
async fn multi_step_rollback_uses_each_migrations_own_scripts() {
  let h = Harness::new(&["1.0.0", "1.1.0", "1.2.0"]).await;
  let first = h.migrate("1.0.0", "1.1.0", &add_rate()).await;
  let second = h.migrate("1.1.0", "1.2.0", &add_broker()).await;
  let forward = h.executor.ran().len();

  let outcome = h.rollback().rollback_to_version(&key(), "1.0.0").await.unwrap();
  assert_eq!(outcome, RollbackOutcome::RolledBack {
    from_version:  "1.2.0".into(),
    to_version:    "1.0.0".into(),
    steps_applied: 2,
  });

  let ran = h.executor.ran()[forward..].to_vec();
  assert_eq!(ran, vec![
    (StoreKind::Relational, second.scripts.sql_rollback_script.clone()),
    (StoreKind::Graph, second.scripts.cypher_rollback_script.clone()),
    (StoreKind::Relational, first.scripts.sql_rollback_script.clone()),
    (StoreKind::Graph, first.scripts.cypher_rollback_script.clone()),
  ]);

  assert_eq!(h.store.active_version(&key()).await.unwrap().unwrap().version, "1.0.0");
  assert_eq!(h.status(first.migration_id).await, MigrationStatus::RolledBack);
  assert_eq!(h.status(second.migration_id).await, MigrationStatus::RolledBack);
  assert!(h.sink.names().contains(&"rolled_back"));
}

#[tokio::test]
async fn failed_rollback_step_stops_and_is_recorded() {
  let h = Harness::new(&["1.0.0", "1.1.0", "1.2.0"]).await;
  let first = h.migrate("1.0.0", "1.1.0", &add_rate()).await;
  let second = h.migrate("1.1.0", "1.2.0", &add_broker()).await;

  h.executor.fail_on(StoreKind::Graph, "rollback 1.1.0 -> 1.0.0");
  let err = h.rollback().rollback_to_version(&key(), "1.0.0").await.unwrap_err();
  assert!(
    matches!(err, CoreError::Execution { step: 1, target: StoreKind::Graph, .. }),
    "{err}"
  );

  assert_eq!(h.status(second.migration_id).await, MigrationStatus::RolledBack);
  assert_eq!(
    h.status(first.migration_id).await,
    MigrationStatus::RollbackFailed { step: 1, target: StoreKind::Graph }
  );
  // The first step completed, so the registry follows it to 1.1.0.
  assert_eq!(h.store.active_version(&key()).await.unwrap().unwrap().version, "1.1.0");
  assert!(!h.sink.names().contains(&"rolled_back"));
}

#[tokio::test]
async fn interrupted_rollback_resumes_after_the_failure_is_fixed() {
  let h = Harness::new(&["1.0.0", "1.1.0", "1.2.0"]).await;
  let first = h.migrate("1.0.0", "1.1.0", &add_rate()).await;
  let second = h.migrate("1.1.0", "1.2.0", &add_broker()).await;

  h.executor.fail_on(StoreKind::Graph, "rollback 1.1.0 -> 1.0.0");
  h.rollback().rollback_to_version(&key(), "1.0.0").await.unwrap_err();

  // The intermediate version is reachable without running anything.
  let outcome = h.rollback().rollback_to_version(&key(), "1.1.0").await.unwrap();
  assert_eq!(outcome, RollbackOutcome::AlreadyActive { version: "1.1.0".into() });

  h.executor.heal();
  let before = h.executor.ran().len();
  let outcome = h.rollback().rollback_to_version(&key(), "1.0.0").await.unwrap();
  assert_eq!(outcome, RollbackOutcome::RolledBack {
    from_version:  "1.1.0".into(),
    to_version:    "1.0.0".into(),
    steps_applied: 1,
  });

  // Only the step that failed runs again.
  let ran = h.executor.ran()[before..].to_vec();
  assert_eq!(ran, vec![
    (StoreKind::Relational, first.scripts.sql_rollback_script.clone()),
    (StoreKind::Graph, first.scripts.cypher_rollback_script.clone()),
  ]);
  assert_eq!(h.status(first.migration_id).await, MigrationStatus::RolledBack);
  assert_eq!(h.status(second.migration_id).await, MigrationStatus::RolledBack);
  assert_eq!(h.store.active_version(&key()).await.unwrap().unwrap().version, "1.0.0");
}

#[tokio::test]
async fn first_step_failure_leaves_active_version_alone() {
  let h = Harness::new(&["1.0.0", "1.1.0", "1.2.0"]).await;
  h.migrate("1.0.0", "1.1.0", &add_rate()).await;
  h.migrate("1.1.0", "1.2.0", &add_broker()).await;

  h.executor.fail_on(StoreKind::Relational, "rollback 1.2.0 -> 1.1.0");
  let err = h.rollback().rollback_to_version(&key(), "1.0.0").await.unwrap_err();
  assert!(matches!(err, CoreError::Execution { step: 0, .. }), "{err}");
  assert_eq!(h.store.active_version(&key()).await.unwrap().unwrap().version, "1.2.0");
}

#[tokio::test]
async fn rollback_without_applied_path_is_not_found() {
  let h = Harness::new(&["1.0.0", "1.1.0"]).await;
  h.store.activate(&key(), "1.1.0").await.unwrap();

  let err = h.rollback().rollback_to_version(&key(), "1.0.0").await.unwrap_err();
  assert!(matches!(err, CoreError::NotFound(_)));
  assert!(h.executor.ran().is_empty());
}

#[tokio::test]
async fn verify_rollback_reports_mismatch() {
  let h = Harness::new(&["1.0.0", "1.1.0"]).await;
  h.store.activate(&key(), "1.1.0").await.unwrap();

  let manager = h.rollback();
  manager.verify_rollback(&key(), "1.1.0").await.unwrap();

  let err = manager.verify_rollback(&key(), "1.0.0").await.unwrap_err();
  match err {
    CoreError::Verification { expected, actual } => {
      assert_eq!(expected, "1.0.0");
      assert_eq!(actual.as_deref(), Some("1.1.0"));
    }
    other => panic!("unexpected error: {other}"),
  }
}

// ─── Deprecations ────────────────────────────────────────────────────────────

fn rename_broker() -> OntologyChange {
  OntologyChange::new(ChangeType::EntityRenamed, "Broker")
    .with_old("Broker")
    .with_new("Lender")
    .breaking()
}

fn deprecations(
  s: &SqliteStore,
  dispatcher: &FakeDispatcher,
) -> DeprecationManager<SqliteStore, FakeDispatcher> {
  DeprecationManager::new(s.clone(), dispatcher.clone(), Arc::new(CollectingSink::default()))
}

#[tokio::test]
async fn schedule_persists_fixed_timeline() {
  let s = store().await;
  let manager = deprecations(&s, &FakeDispatcher::default());
  let t0 = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();

  let policy = manager
    .schedule_deprecation_at(&rename_broker(), TENANT, vec!["ops@example.com".into()], t0)
    .await
    .unwrap();

  assert_eq!(policy.deprecation_date, t0 + Months::new(12));
  assert_eq!(policy.deprecated_entity_name, "Broker");
  assert_eq!(policy.replacement_entity_name.as_deref(), Some("Lender"));
  let kinds: Vec<_> = policy.notifications.iter().map(|n| n.notification_type).collect();
  assert_eq!(kinds, NotificationType::ALL.to_vec());

  let stored = manager.get_policy(policy.policy_id).await.unwrap();
  assert_eq!(stored, policy);
  assert_eq!(stored.phase(), DeprecationPhase::Scheduled);
  assert_eq!(manager.list_policies(TENANT).await.unwrap().len(), 1);
}

#[tokio::test]
async fn non_breaking_change_needs_no_deprecation() {
  let s = store().await;
  let manager = deprecations(&s, &FakeDispatcher::default());
  let change = OntologyChange::new(ChangeType::EntityAdded, "Broker");

  let err = manager.schedule_deprecation(&change, TENANT, vec![]).await.unwrap_err();
  assert!(matches!(err, CoreError::InvalidChange(_)));
}

#[tokio::test]
async fn due_notifications_are_sent_once() {
  let s = store().await;
  let dispatcher = FakeDispatcher::default();
  let manager = deprecations(&s, &dispatcher);
  let t0 = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
  let policy = manager
    .schedule_deprecation_at(&rename_broker(), TENANT, vec!["ops@example.com".into()], t0)
    .await
    .unwrap();

  assert!(manager.pending_notifications_at(t0).await.unwrap().is_empty());

  let six_months = t0 + Months::new(6);
  let due = manager.pending_notifications_at(six_months).await.unwrap();
  assert_eq!(due.len(), 1);
  assert_eq!(due[0].notification_type, NotificationType::SixMonths);

  let sent = manager.send_notification(&due[0]).await.unwrap();
  assert!(sent.sent);
  assert!(sent.sent_at.is_some());
  assert!(manager.pending_notifications_at(six_months).await.unwrap().is_empty());

  // Sending a stale copy again is a no-op.
  manager.send_notification(&sent).await.unwrap();
  let notices = dispatcher.sent.lock().unwrap().clone();
  assert_eq!(notices.len(), 1);
  assert_eq!(notices[0].recipients, vec!["ops@example.com".to_owned()]);
  assert!(notices[0].subject.contains("Broker"));

  let stored = manager.get_policy(policy.policy_id).await.unwrap();
  assert_eq!(stored.phase(), DeprecationPhase::Notifying(NotificationType::SixMonths));
}

#[tokio::test]
async fn dispatch_failure_leaves_notification_pending() {
  let s = store().await;
  let dispatcher = FakeDispatcher::default();
  let manager = deprecations(&s, &dispatcher);
  let t0 = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
  manager
    .schedule_deprecation_at(&rename_broker(), TENANT, vec![], t0)
    .await
    .unwrap();

  let as_of = t0 + Months::new(6);
  let due = manager.pending_notifications_at(as_of).await.unwrap();
  dispatcher.down.store(true, Ordering::SeqCst);

  let err = manager.send_notification(&due[0]).await.unwrap_err();
  assert!(matches!(err, CoreError::Dispatch { .. }));
  assert_eq!(manager.pending_notifications_at(as_of).await.unwrap().len(), 1);
}

#[tokio::test]
async fn complete_deprecation_once() {
  let s = store().await;
  let dispatcher = FakeDispatcher::default();
  let manager = deprecations(&s, &dispatcher);
  let t0 = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
  let policy = manager
    .schedule_deprecation_at(&rename_broker(), TENANT, vec![], t0)
    .await
    .unwrap();

  let end = t0 + Months::new(12);
  for notification in manager.pending_notifications_at(end).await.unwrap() {
    manager.send_notification(&notification).await.unwrap();
  }
  assert_eq!(dispatcher.sent.lock().unwrap().len(), 5);
  assert_eq!(
    manager.get_policy(policy.policy_id).await.unwrap().phase(),
    DeprecationPhase::Final
  );

  let completed = manager.complete_deprecation(policy.policy_id).await.unwrap();
  assert_eq!(completed.status, PolicyStatus::Completed);
  assert!(completed.completed_at.is_some());

  let err = manager.complete_deprecation(policy.policy_id).await.unwrap_err();
  assert!(matches!(err, CoreError::Conflict(_)));
}

#[tokio::test]
async fn completed_policies_stop_notifying() {
  let s = store().await;
  let manager = deprecations(&s, &FakeDispatcher::default());
  let t0 = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
  let policy = manager
    .schedule_deprecation_at(&rename_broker(), TENANT, vec![], t0)
    .await
    .unwrap();

  manager.complete_deprecation(policy.policy_id).await.unwrap();
  let far_future = t0 + Months::new(24);
  assert!(manager.pending_notifications_at(far_future).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_policy_is_not_found() {
  let s = store().await;
  let manager = deprecations(&s, &FakeDispatcher::default());
  let err = manager.complete_deprecation(Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, CoreError::NotFound(_)));
}
