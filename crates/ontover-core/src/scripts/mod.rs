//! Forward and rollback script generation for the relational and graph
//! stores.
//!
//! Both generators are pure: a change set in, text out. Each change maps to a
//! forward fragment; the rollback script is the forward rendering of the
//! inverted change set in reverse order (see [`ChangeSet::rollback_order`]).
//! Every emitted statement is guarded so that re-running a partially applied
//! script is a no-op for the parts already done.

pub mod cypher;
pub mod sql;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  change::{ChangeSet, OntologyChange},
  model::Catalog,
};

// ─── Property types ──────────────────────────────────────────────────────────

/// The ontology's property type vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum PropertyType {
  String,
  Integer,
  Decimal,
  Boolean,
  Date,
  DateTime,
  Array,
  Object,
  Unknown,
}

impl PropertyType {
  /// Lenient parse; anything unrecognised is [`PropertyType::Unknown`].
  pub fn parse(raw: Option<&str>) -> Self {
    let Some(raw) = raw else { return Self::Unknown };
    match raw.trim().to_ascii_lowercase().as_str() {
      "string" | "text" => Self::String,
      "integer" | "int" | "long" => Self::Integer,
      "decimal" | "number" | "float" | "double" => Self::Decimal,
      "boolean" | "bool" => Self::Boolean,
      "date" => Self::Date,
      "datetime" | "timestamp" => Self::DateTime,
      "array" | "list" => Self::Array,
      "object" | "map" | "json" => Self::Object,
      _ => Self::Unknown,
    }
  }
}

// ─── Validation rules ────────────────────────────────────────────────────────

/// A property validation rule, as carried by validation-added/removed changes.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationRule {
  Required,
  Positive,
  Min(f64),
  Max(f64),
  MinLength(u32),
  MaxLength(u32),
  OneOf(Vec<String>),
}

impl ValidationRule {
  pub fn parse(raw: &str) -> Result<Self> {
    let invalid = || Error::InvalidChange(format!("unrecognised validation rule {raw:?}"));
    let (name, arg) = match raw.split_once(':') {
      Some((name, arg)) => (name.trim(), Some(arg.trim())),
      None => (raw.trim(), None),
    };
    let number = |arg: Option<&str>| -> Result<f64> {
      arg
        .and_then(|a| a.parse::<f64>().ok())
        .filter(|n| n.is_finite())
        .ok_or_else(invalid)
    };
    let length = |arg: Option<&str>| -> Result<u32> {
      arg.and_then(|a| a.parse::<u32>().ok()).ok_or_else(invalid)
    };

    match (name, arg) {
      ("required", None) => Ok(Self::Required),
      ("positive", None) => Ok(Self::Positive),
      ("min", arg) => Ok(Self::Min(number(arg)?)),
      ("max", arg) => Ok(Self::Max(number(arg)?)),
      ("min_length", arg) => Ok(Self::MinLength(length(arg)?)),
      ("max_length", arg) => Ok(Self::MaxLength(length(arg)?)),
      ("one_of", Some(list)) if !list.is_empty() => {
        Ok(Self::OneOf(list.split('|').map(|s| s.trim().to_owned()).collect()))
      }
      _ => Err(invalid()),
    }
  }

  /// Short name used in derived constraint names.
  pub fn slug(&self) -> &'static str {
    match self {
      Self::Required => "required",
      Self::Positive => "positive",
      Self::Min(_) => "min",
      Self::Max(_) => "max",
      Self::MinLength(_) => "min_length",
      Self::MaxLength(_) => "max_length",
      Self::OneOf(_) => "one_of",
    }
  }
}

// ─── Script ──────────────────────────────────────────────────────────────────

/// The comment marker of a script's language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
  Sql,
  Cypher,
}

impl Dialect {
  fn comment(self) -> &'static str {
    match self {
      Self::Sql => "--",
      Self::Cypher => "//",
    }
  }
}

/// An ordered list of statements plus interleaved comments.
#[derive(Debug, Clone)]
pub struct Script {
  dialect: Dialect,
  lines:   Vec<Line>,
}

#[derive(Debug, Clone)]
enum Line {
  Comment(String),
  Statement(String),
}

impl Script {
  pub fn new(dialect: Dialect) -> Self { Self { dialect, lines: Vec::new() } }

  /// Line breaks are flattened so user-supplied text cannot end the comment.
  pub fn comment(&mut self, text: impl Into<String>) {
    let text = text.into().replace(['\n', '\r'], " ");
    self.lines.push(Line::Comment(text));
  }

  pub fn statement(&mut self, text: impl Into<String>) {
    self.lines.push(Line::Statement(text.into()));
  }

  /// Executable statements, without comments.
  pub fn statements(&self) -> impl Iterator<Item = &str> {
    self.lines.iter().filter_map(|l| match l {
      Line::Statement(s) => Some(s.as_str()),
      Line::Comment(_) => None,
    })
  }
}

impl fmt::Display for Script {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let marker = self.dialect.comment();
    for line in &self.lines {
      match line {
        Line::Comment(text) => writeln!(f, "{marker} {text}")?,
        Line::Statement(text) => writeln!(f, "{text};")?,
      }
    }
    Ok(())
  }
}

/// A describing header line shared by every fragment.
fn describe(change: &OntologyChange) -> String {
  let mut text = format!("{} {}", change.change_type, change.entity_type);
  if let Some(prop) = &change.property_name {
    text.push('.');
    text.push_str(prop);
  }
  match (&change.old_value, &change.new_value) {
    (Some(old), Some(new)) => text.push_str(&format!(" ({old} -> {new})")),
    (None, Some(new)) => text.push_str(&format!(" ({new})")),
    (Some(old), None) => text.push_str(&format!(" (was {old})")),
    (None, None) => {}
  }
  text
}

// ─── MigrationScripts ────────────────────────────────────────────────────────

/// The paired forward/rollback scripts for both stores, generated once per
/// migration and never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationScripts {
  pub from_version:           String,
  pub to_version:             String,
  pub sql_script:             String,
  pub sql_rollback_script:    String,
  pub cypher_script:          String,
  pub cypher_rollback_script: String,
  pub generated_at:           DateTime<Utc>,
}

/// Run both generators over `changes` and bundle the four scripts.
/// `source` is the catalog of the `from_version` model.
pub fn generate(
  from_version: &str,
  to_version: &str,
  changes: &ChangeSet,
  source: &Catalog,
) -> Result<MigrationScripts> {
  let forward = changes.forward_order();
  let rollback = changes.rollback_order();

  let title = format!("migration {from_version} -> {to_version}");
  let undo = format!("rollback {to_version} -> {from_version}");

  Ok(MigrationScripts {
    from_version:           from_version.to_owned(),
    to_version:             to_version.to_owned(),
    sql_script:             sql::render(&title, forward.iter().copied())?.to_string(),
    sql_rollback_script:    sql::render(&undo, rollback.iter())?.to_string(),
    cypher_script:          cypher::render(&title, forward.iter().copied(), source)?.to_string(),
    cypher_rollback_script: cypher::render(&undo, rollback.iter(), source)?.to_string(),
    generated_at:           Utc::now(),
  })
}
