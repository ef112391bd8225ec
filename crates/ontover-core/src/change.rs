//! Structured change records and the ordering rules applied to them.
//!
//! Change sets are produced by an external diff engine and consumed here
//! read-only. The field conventions per [`ChangeType`] are:
//!
//! | Change | `entity_type` | `property_name` | `old_value` | `new_value` |
//! |---|---|---|---|---|
//! | entity added/removed | entity | – | – | – |
//! | entity renamed | – | – | old entity | new entity |
//! | property added | entity | property | – | property type |
//! | property removed | entity | property | property type | – |
//! | property renamed | entity | – | old property | new property |
//! | property type changed | entity | property | old type | new type |
//! | relationship added | source entity | relationship | – | target entity |
//! | relationship removed | source entity | relationship | target entity | – |
//! | relationship renamed | source entity | – | old relationship | new relationship |
//! | validation added | entity | property | – | rule |
//! | validation removed | entity | property | rule | – |

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// The closed set of structural changes.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
  EntityAdded,
  EntityRemoved,
  EntityRenamed,
  PropertyAdded,
  PropertyRemoved,
  PropertyRenamed,
  PropertyTypeChanged,
  RelationshipAdded,
  RelationshipRemoved,
  RelationshipRenamed,
  ValidationAdded,
  ValidationRemoved,
}

impl ChangeType {
  /// Position in the forward application order. Objects are created before
  /// anything references them and dropped only after their dependents.
  pub fn priority(self) -> u8 {
    match self {
      Self::EntityAdded => 0,
      Self::EntityRenamed => 1,
      Self::ValidationRemoved => 2,
      Self::PropertyAdded => 3,
      Self::PropertyRenamed => 4,
      Self::PropertyTypeChanged => 5,
      Self::RelationshipAdded => 6,
      Self::RelationshipRenamed => 7,
      Self::ValidationAdded => 8,
      Self::RelationshipRemoved => 9,
      Self::PropertyRemoved => 10,
      Self::EntityRemoved => 11,
    }
  }

  pub fn is_rename(self) -> bool {
    matches!(
      self,
      Self::EntityRenamed | Self::PropertyRenamed | Self::RelationshipRenamed
    )
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VersionImpact {
  Breaking,
  #[default]
  NonBreaking,
}

/// One structural difference between two ontology versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyChange {
  #[serde(default = "Uuid::new_v4")]
  pub change_id:        Uuid,
  pub change_type:      ChangeType,
  #[serde(default)]
  pub entity_type:      String,
  #[serde(default)]
  pub property_name:    Option<String>,
  #[serde(default)]
  pub old_value:        Option<String>,
  #[serde(default)]
  pub new_value:        Option<String>,
  #[serde(default)]
  pub description:      String,
  #[serde(default)]
  pub version_impact:   VersionImpact,
  /// 0–100.
  #[serde(default = "full_confidence", deserialize_with = "confidence")]
  pub confidence_score: u8,
}

fn full_confidence() -> u8 { 100 }

fn confidence<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
  let score = u8::deserialize(deserializer)?;
  if score > 100 {
    return Err(serde::de::Error::custom(format!(
      "confidence_score must be between 0 and 100, got {score}"
    )));
  }
  Ok(score)
}

impl OntologyChange {
  pub fn new(change_type: ChangeType, entity_type: impl Into<String>) -> Self {
    Self {
      change_id: Uuid::new_v4(),
      change_type,
      entity_type: entity_type.into(),
      property_name: None,
      old_value: None,
      new_value: None,
      description: String::new(),
      version_impact: VersionImpact::default(),
      confidence_score: full_confidence(),
    }
  }

  pub fn with_property(mut self, name: impl Into<String>) -> Self {
    self.property_name = Some(name.into());
    self
  }

  pub fn with_old(mut self, value: impl Into<String>) -> Self {
    self.old_value = Some(value.into());
    self
  }

  pub fn with_new(mut self, value: impl Into<String>) -> Self {
    self.new_value = Some(value.into());
    self
  }

  pub fn breaking(mut self) -> Self {
    self.version_impact = VersionImpact::Breaking;
    self
  }

  pub fn is_breaking(&self) -> bool {
    self.version_impact == VersionImpact::Breaking
  }

  /// The change that undoes this one. Renames swap `old_value`/`new_value`;
  /// additions and removals trade places, carrying their payload across.
  pub fn inverse(&self) -> Self {
    use ChangeType::*;

    let change_type = match self.change_type {
      EntityAdded => EntityRemoved,
      EntityRemoved => EntityAdded,
      PropertyAdded => PropertyRemoved,
      PropertyRemoved => PropertyAdded,
      RelationshipAdded => RelationshipRemoved,
      RelationshipRemoved => RelationshipAdded,
      ValidationAdded => ValidationRemoved,
      ValidationRemoved => ValidationAdded,
      other => other,
    };

    Self {
      change_type,
      old_value: self.new_value.clone(),
      new_value: self.old_value.clone(),
      ..self.clone()
    }
  }

  /// The property name this change is about, or an error naming the field.
  pub fn require_property(&self) -> Result<&str> {
    self
      .property_name
      .as_deref()
      .filter(|s| !s.is_empty())
      .ok_or_else(|| self.missing("property_name"))
  }

  pub fn require_old(&self) -> Result<&str> {
    self
      .old_value
      .as_deref()
      .filter(|s| !s.is_empty())
      .ok_or_else(|| self.missing("old_value"))
  }

  pub fn require_new(&self) -> Result<&str> {
    self
      .new_value
      .as_deref()
      .filter(|s| !s.is_empty())
      .ok_or_else(|| self.missing("new_value"))
  }

  pub fn require_entity(&self) -> Result<&str> {
    Some(self.entity_type.as_str())
      .filter(|s| !s.is_empty())
      .ok_or_else(|| self.missing("entity_type"))
  }

  fn missing(&self, field: &str) -> Error {
    Error::InvalidChange(format!(
      "{} change {} is missing {field}",
      self.change_type, self.change_id
    ))
  }
}

// ─── ChangeSet ───────────────────────────────────────────────────────────────

/// An ordered list of changes as delivered by the diff engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(pub Vec<OntologyChange>);

impl ChangeSet {
  pub fn new(changes: Vec<OntologyChange>) -> Self { Self(changes) }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn iter(&self) -> impl Iterator<Item = &OntologyChange> { self.0.iter() }

  /// Changes in forward application order. The sort is stable, so changes
  /// of equal priority keep the diff engine's order.
  pub fn forward_order(&self) -> Vec<&OntologyChange> {
    let mut ordered: Vec<&OntologyChange> = self.0.iter().collect();
    ordered.sort_by_key(|c| c.change_type.priority());
    ordered
  }

  /// Inverse changes in rollback order: the exact reverse of
  /// [`Self::forward_order`].
  pub fn rollback_order(&self) -> Vec<OntologyChange> {
    self
      .forward_order()
      .into_iter()
      .rev()
      .map(OntologyChange::inverse)
      .collect()
  }

  pub fn breaking(&self) -> impl Iterator<Item = &OntologyChange> {
    self.0.iter().filter(|c| c.is_breaking())
  }
}

impl From<Vec<OntologyChange>> for ChangeSet {
  fn from(changes: Vec<OntologyChange>) -> Self { Self(changes) }
}
