//! Version lifecycle: validate, create, publish.
//!
//! Versions are created inactive and become active only through
//! [`VersionLifecycle::publish`], which delegates the deactivate-then-activate
//! swap to the store as one atomic operation.

use std::sync::Arc;

use tracing::info;

use crate::{
  Error, Result,
  events::{DomainEvent, EventSink, emit},
  model::{self, ValidationReport},
  store::OntologyStore,
  version::{Activation, NewVersion, OntologyKey, OntologyVersion, SemVer},
};

pub struct VersionLifecycle<S> {
  store:  S,
  events: Arc<dyn EventSink>,
}

impl<S> VersionLifecycle<S>
where
  S: OntologyStore,
  Error: From<S::Error>,
{
  pub fn new(store: S, events: Arc<dyn EventSink>) -> Self { Self { store, events } }

  /// Structural checks only; nothing is persisted.
  pub fn validate(&self, version: &NewVersion) -> ValidationReport {
    model::validate(version)
  }

  /// Persist `version` inactive. Fails with [`Error::Conflict`] if the
  /// version string is already taken for this ontology.
  pub async fn create(&self, version: NewVersion) -> Result<OntologyVersion> {
    version.version.parse::<SemVer>()?;

    let created = self.store.insert_version(version).await?;
    info!(
      tenant = %created.tenant_id,
      ontology = %created.ontology_name,
      version = %created.version,
      "ontology version created"
    );
    emit(self.events.as_ref(), DomainEvent::VersionCreated {
      tenant_id: created.tenant_id,
      ontology:  created.ontology_name.clone(),
      version:   created.version.clone(),
    });
    Ok(created)
  }

  /// Validate, then create. A failing report blocks creation entirely.
  pub async fn upload(&self, version: NewVersion) -> Result<OntologyVersion> {
    let report = self.validate(&version);
    if !report.is_valid() {
      return Err(Error::Validation(report));
    }
    self.create(version).await
  }

  /// Make `version` the single active version of `key`.
  pub async fn publish(&self, key: &OntologyKey, version: &str) -> Result<Activation> {
    let activation = self.store.activate(key, version).await?;
    info!(
      ontology = %key,
      version,
      previous = activation.previous.as_deref().unwrap_or("none"),
      "ontology version published"
    );
    emit(self.events.as_ref(), DomainEvent::VersionPublished {
      tenant_id: key.tenant_id,
      ontology:  key.ontology.clone(),
      version:   version.to_owned(),
      previous:  activation.previous.clone(),
    });
    Ok(activation)
  }

  pub async fn get(&self, key: &OntologyKey, version: &str) -> Result<OntologyVersion> {
    self
      .store
      .get_version(key, version)
      .await?
      .ok_or_else(|| Error::NotFound(format!("version {version} of {key}")))
  }

  /// All versions of `key`, oldest semantic version first.
  pub async fn list(&self, key: &OntologyKey) -> Result<Vec<OntologyVersion>> {
    let mut versions = self.store.list_versions(key).await?;
    versions.sort_by(OntologyVersion::cmp_semver);
    Ok(versions)
  }

  pub async fn active(&self, key: &OntologyKey) -> Result<Option<OntologyVersion>> {
    Ok(self.store.active_version(key).await?)
  }
}
