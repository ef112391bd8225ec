//! Structural validation of uploaded ontology models.
//!
//! Validation is all-or-nothing: it reports every defect it finds and never
//! changes anything. A failing report blocks version creation.

use std::{
  collections::{HashMap, HashSet},
  fmt,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, ident::Ident, version::NewVersion, version::SemVer};

/// A single structural defect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
  /// JSON-pointer-ish location, e.g. `entities[2].name`.
  pub path:    String,
  pub message: String,
}

/// The outcome of [`validate`]. Passing means `issues` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
  pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
  pub fn is_valid(&self) -> bool { self.issues.is_empty() }

  fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
    self.issues.push(ValidationIssue {
      path:    path.into(),
      message: message.into(),
    });
  }
}

impl fmt::Display for ValidationReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.issues.is_empty() {
      return f.write_str("no issues");
    }
    let parts: Vec<String> = self
      .issues
      .iter()
      .map(|i| format!("{}: {}", i.path, i.message))
      .collect();
    f.write_str(&parts.join("; "))
  }
}

/// Validate the metadata and model of a version about to be created.
pub fn validate(version: &NewVersion) -> ValidationReport {
  let mut report = ValidationReport::default();

  if version.tenant_id.is_nil() {
    report.push("tenant_id", "is required");
  }
  if version.ontology_name.trim().is_empty() {
    report.push("ontology_name", "is required");
  }
  if version.created_by.trim().is_empty() {
    report.push("created_by", "is required");
  }
  if version.branch.trim().is_empty() {
    report.push("branch", "is required");
  }
  if version.version.parse::<SemVer>().is_err() {
    report.push("version", format!("{:?} is not major.minor.patch", version.version));
  }

  validate_model_into(&version.model_json, &mut report);
  report
}

/// Validate only the serialised model.
pub fn validate_model(model_json: &str) -> ValidationReport {
  let mut report = ValidationReport::default();
  validate_model_into(model_json, &mut report);
  report
}

fn validate_model_into(model_json: &str, report: &mut ValidationReport) {
  let model: Value = match serde_json::from_str(model_json) {
    Ok(v) => v,
    Err(e) => {
      report.push("model_json", format!("is not well-formed JSON: {e}"));
      return;
    }
  };

  let entities = match model.get("entities").and_then(Value::as_array) {
    Some(list) if !list.is_empty() => list,
    Some(_) => {
      report.push("entities", "must not be empty");
      return;
    }
    None => {
      report.push("entities", "must be an array");
      return;
    }
  };

  let mut declared: HashSet<&str> = HashSet::new();
  for (i, entity) in entities.iter().enumerate() {
    let path = format!("entities[{i}]");
    let Some(name) = entity.get("name").and_then(Value::as_str) else {
      report.push(format!("{path}.name"), "is required");
      continue;
    };
    if Ident::parse(name).is_err() {
      report.push(format!("{path}.name"), format!("{name:?} is not a valid identifier"));
    }
    if !declared.insert(name) {
      report.push(format!("{path}.name"), format!("duplicate entity {name:?}"));
    }
    check_properties(entity, &path, report);
  }

  let Some(relationships) = model.get("relationships") else {
    return;
  };
  let Some(relationships) = relationships.as_array() else {
    report.push("relationships", "must be an array");
    return;
  };
  for (i, rel) in relationships.iter().enumerate() {
    let path = format!("relationships[{i}]");
    match rel.get("name").and_then(Value::as_str) {
      Some(name) if Ident::parse(name).is_ok() => {}
      Some(name) => {
        report.push(format!("{path}.name"), format!("{name:?} is not a valid identifier"))
      }
      None => report.push(format!("{path}.name"), "is required"),
    }
    for end in ["from", "to"] {
      match rel.get(end).and_then(Value::as_str) {
        Some(target) if declared.contains(target) => {}
        Some(target) => {
          report.push(format!("{path}.{end}"), format!("unknown entity {target:?}"))
        }
        None => report.push(format!("{path}.{end}"), "is required"),
      }
    }
  }
}

fn check_properties(entity: &Value, path: &str, report: &mut ValidationReport) {
  let Some(properties) = entity.get("properties") else {
    return;
  };
  let Some(properties) = properties.as_array() else {
    report.push(format!("{path}.properties"), "must be an array");
    return;
  };
  let mut seen: HashSet<&str> = HashSet::new();
  for (j, prop) in properties.iter().enumerate() {
    let prop_path = format!("{path}.properties[{j}]");
    let Some(name) = prop.get("name").and_then(Value::as_str) else {
      report.push(format!("{prop_path}.name"), "is required");
      continue;
    };
    if Ident::parse(name).is_err() {
      report.push(format!("{prop_path}.name"), format!("{name:?} is not a valid identifier"));
    }
    if !seen.insert(name) {
      report.push(format!("{prop_path}.name"), format!("duplicate property {name:?}"));
    }
  }
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

/// A property as declared on an entity in a stored model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogProperty {
  pub name:     String,
  /// `"required": true` on the property.
  pub required: bool,
}

/// Entity to property lookup over a stored model. Script generation uses it
/// for changes whose text depends on what already hangs off an entity, such
/// as moving property indexes when the entity is renamed.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
  entities: HashMap<String, Vec<CatalogProperty>>,
}

impl Catalog {
  /// Read the entities and their properties from a model. Only the shape
  /// needed here is read; validity was established when the version was
  /// created.
  pub fn from_model_json(model_json: &str) -> Result<Self> {
    let model: Value = serde_json::from_str(model_json)?;
    let mut entities = HashMap::new();
    for entity in model.get("entities").and_then(Value::as_array).into_iter().flatten() {
      let Some(name) = entity.get("name").and_then(Value::as_str) else {
        continue;
      };
      let properties = entity
        .get("properties")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|p| {
          Some(CatalogProperty {
            name:     p.get("name")?.as_str()?.to_owned(),
            required: p.get("required").and_then(Value::as_bool).unwrap_or(false),
          })
        })
        .collect();
      entities.insert(name.to_owned(), properties);
    }
    Ok(Self { entities })
  }

  /// Declared properties of `entity`; empty when the entity is unknown.
  pub fn properties(&self, entity: &str) -> &[CatalogProperty] {
    self.entities.get(entity).map(Vec::as_slice).unwrap_or(&[])
  }
}
