//! The `OntologyStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `ontover-store-sqlite`).
//! The services in this crate depend on this abstraction, not on any concrete
//! backend. Backends convert their error type into [`crate::Error`] so that
//! domain failures raised at the storage layer (duplicate version, unknown
//! version on activation) reach callers unchanged.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  deprecation::{DeprecationNotification, DeprecationPolicy},
  migration::{MigrationRecord, MigrationStatus},
  version::{Activation, NewVersion, OntologyKey, OntologyVersion},
};

/// Abstraction over the version registry, the migration history and the
/// deprecation schedule.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes.
pub trait OntologyStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Versions ──────────────────────────────────────────────────────────

  /// Persist a new version. The store assigns `id` and `created_at` and
  /// always inserts it inactive. Fails with a conflict if
  /// `(tenant, ontology, version)` already exists.
  fn insert_version(
    &self,
    input: NewVersion,
  ) -> impl Future<Output = Result<OntologyVersion, Self::Error>> + Send + '_;

  fn get_version<'a>(
    &'a self,
    key: &'a OntologyKey,
    version: &'a str,
  ) -> impl Future<Output = Result<Option<OntologyVersion>, Self::Error>> + Send + 'a;

  fn list_versions<'a>(
    &'a self,
    key: &'a OntologyKey,
  ) -> impl Future<Output = Result<Vec<OntologyVersion>, Self::Error>> + Send + 'a;

  fn active_version<'a>(
    &'a self,
    key: &'a OntologyKey,
  ) -> impl Future<Output = Result<Option<OntologyVersion>, Self::Error>> + Send + 'a;

  /// Atomically deactivate whatever is active for `key` and activate
  /// `version`. This is the only writer of `is_active`; implementations must
  /// make it race-free (unique constraint or compare-and-swap). Fails with
  /// not-found if `version` does not exist.
  fn activate<'a>(
    &'a self,
    key: &'a OntologyKey,
    version: &'a str,
  ) -> impl Future<Output = Result<Activation, Self::Error>> + Send + 'a;

  // ── Migration history ─────────────────────────────────────────────────

  fn insert_migration<'a>(
    &'a self,
    record: &'a MigrationRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn get_migration(
    &self,
    migration_id: Uuid,
  ) -> impl Future<Output = Result<Option<MigrationRecord>, Self::Error>> + Send + '_;

  /// All migrations for `key`, most recently applied first; never-applied
  /// records follow, most recently recorded first.
  fn list_migrations<'a>(
    &'a self,
    key: &'a OntologyKey,
  ) -> impl Future<Output = Result<Vec<MigrationRecord>, Self::Error>> + Send + 'a;

  /// Overwrite the status of a migration. `applied_at` is only written when
  /// `Some`.
  fn set_migration_status(
    &self,
    migration_id: Uuid,
    status: MigrationStatus,
    applied_at: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Deprecations ──────────────────────────────────────────────────────

  /// Persist a policy together with all of its notifications.
  fn insert_policy<'a>(
    &'a self,
    policy: &'a DeprecationPolicy,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn get_policy(
    &self,
    policy_id: Uuid,
  ) -> impl Future<Output = Result<Option<DeprecationPolicy>, Self::Error>> + Send + '_;

  fn list_policies(
    &self,
    tenant_id: Uuid,
  ) -> impl Future<Output = Result<Vec<DeprecationPolicy>, Self::Error>> + Send + '_;

  /// Unsent notifications scheduled at or before `as_of` whose policy is
  /// still scheduled, oldest first.
  fn due_notifications(
    &self,
    as_of: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<DeprecationNotification>, Self::Error>> + Send + '_;

  /// Flip `sent` from false to true. Returns `false` if the notification was
  /// already marked sent (or does not exist).
  fn mark_notification_sent(
    &self,
    notification_id: Uuid,
    sent_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Move a policy from scheduled to completed. Returns `false` if it was not
  /// in the scheduled state.
  fn complete_policy(
    &self,
    policy_id: Uuid,
    completed_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}
