//! Ontology versions and the semantic version strings that name them.
//!
//! A version record is written once, inactive. The only field that ever
//! changes afterwards is `is_active` (plus `published_at`), and only through
//! [`crate::store::OntologyStore::activate`].

use std::{cmp::Ordering, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

// ─── Key ─────────────────────────────────────────────────────────────────────

/// Identifies one ontology of one tenant. The single-active-version invariant
/// is scoped to this pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OntologyKey {
  pub tenant_id: Uuid,
  pub ontology:  String,
}

impl OntologyKey {
  pub fn new(tenant_id: Uuid, ontology: impl Into<String>) -> Self {
    Self { tenant_id, ontology: ontology.into() }
  }
}

impl fmt::Display for OntologyKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.tenant_id, self.ontology)
  }
}

// ─── SemVer ──────────────────────────────────────────────────────────────────

/// A `major.minor.patch` version. Pre-release and build suffixes are not
/// accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SemVer {
  pub major: u64,
  pub minor: u64,
  pub patch: u64,
}

impl FromStr for SemVer {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || Error::InvalidVersion(s.to_owned());
    let mut parts = s.split('.');
    let mut next = || -> Result<u64, Error> {
      let part = parts.next().ok_or_else(invalid)?;
      // Reject "+1", leading zeros and empty components.
      if part.is_empty()
        || !part.bytes().all(|b| b.is_ascii_digit())
        || (part.len() > 1 && part.starts_with('0'))
      {
        return Err(invalid());
      }
      part.parse().map_err(|_| invalid())
    };
    let version = SemVer { major: next()?, minor: next()?, patch: next()? };
    if parts.next().is_some() {
      return Err(invalid());
    }
    Ok(version)
  }
}

impl fmt::Display for SemVer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
  }
}

// ─── OntologyVersion ─────────────────────────────────────────────────────────

/// A stored ontology version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologyVersion {
  pub id:            Uuid,
  pub tenant_id:     Uuid,
  pub ontology_name: String,
  /// Semantic `major.minor.patch` string.
  pub version:       String,
  /// The serialised ontology model, as uploaded.
  pub model_json:    String,
  pub is_active:     bool,
  pub created_at:    DateTime<Utc>,
  pub created_by:    String,
  pub branch:        String,
  /// Set when the version was most recently made active.
  pub published_at:  Option<DateTime<Utc>>,
}

impl OntologyVersion {
  pub fn key(&self) -> OntologyKey {
    OntologyKey::new(self.tenant_id, self.ontology_name.clone())
  }

  /// Order by semantic version; unparsable strings sort last.
  pub fn cmp_semver(&self, other: &Self) -> Ordering {
    match (
      self.version.parse::<SemVer>(),
      other.version.parse::<SemVer>(),
    ) {
      (Ok(a), Ok(b)) => a.cmp(&b),
      (Ok(_), Err(_)) => Ordering::Less,
      (Err(_), Ok(_)) => Ordering::Greater,
      (Err(_), Err(_)) => self.version.cmp(&other.version),
    }
  }
}

// ─── NewVersion ──────────────────────────────────────────────────────────────

/// Input to [`crate::store::OntologyStore::insert_version`]. `id`,
/// `created_at` and `is_active` are always set by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVersion {
  pub tenant_id:     Uuid,
  pub ontology_name: String,
  pub version:       String,
  pub model_json:    String,
  pub created_by:    String,
  #[serde(default = "default_branch")]
  pub branch:        String,
}

fn default_branch() -> String { "main".to_owned() }

impl NewVersion {
  pub fn new(
    key: &OntologyKey,
    version: impl Into<String>,
    model_json: impl Into<String>,
    created_by: impl Into<String>,
  ) -> Self {
    Self {
      tenant_id:     key.tenant_id,
      ontology_name: key.ontology.clone(),
      version:       version.into(),
      model_json:    model_json.into(),
      created_by:    created_by.into(),
      branch:        default_branch(),
    }
  }

  pub fn key(&self) -> OntologyKey {
    OntologyKey::new(self.tenant_id, self.ontology_name.clone())
  }
}

/// The result of a successful activation: the version that is now active and
/// the one it replaced, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activation {
  pub activated: OntologyVersion,
  pub previous:  Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_plain_triples() {
    let v: SemVer = "1.20.3".parse().unwrap();
    assert_eq!(v, SemVer { major: 1, minor: 20, patch: 3 });
    assert_eq!(v.to_string(), "1.20.3");
  }

  #[test]
  fn rejects_malformed_versions() {
    for bad in ["", "1", "1.2", "1.2.3.4", "1.02.3", "v1.2.3", "1.2.-3", "1.2.3-rc1"] {
      assert!(bad.parse::<SemVer>().is_err(), "accepted {bad:?}");
    }
  }

  #[test]
  fn orders_numerically_not_lexically() {
    let a: SemVer = "1.9.0".parse().unwrap();
    let b: SemVer = "1.10.0".parse().unwrap();
    assert!(a < b);
  }
}
