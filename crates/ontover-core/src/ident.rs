//! Identifier validation, naming and quoting.
//!
//! Entity, property and relationship names come from user-uploaded ontology
//! definitions. Nothing reaches script text without passing through
//! [`Ident::parse`], and all quoting happens here.

use std::{fmt, sync::LazyLock};

use regex::Regex;

use crate::{Error, Result};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// Postgres truncates identifiers beyond this length.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// A validated identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
  pub fn parse(raw: &str) -> Result<Self> {
    if raw.len() > MAX_IDENTIFIER_LEN || !IDENTIFIER.is_match(raw) {
      return Err(Error::InvalidIdentifier(raw.to_owned()));
    }
    Ok(Self(raw.to_owned()))
  }

  pub fn as_str(&self) -> &str { &self.0 }

  /// `LenderProfile` → `lender_profile`.
  pub fn snake_case(&self) -> Ident {
    let mut out = String::with_capacity(self.0.len() + 4);
    let chars: Vec<char> = self.0.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
      if c.is_ascii_uppercase() {
        let prev_lower = i > 0
          && (chars[i - 1].is_ascii_lowercase() || chars[i - 1].is_ascii_digit());
        let next_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
        let prev_upper = i > 0 && chars[i - 1].is_ascii_uppercase();
        if prev_lower || (prev_upper && next_lower) {
          out.push('_');
        }
        out.push(c.to_ascii_lowercase());
      } else {
        out.push(c);
      }
    }
    Ident(out)
  }

  /// Relational table name for an entity: snake case, pluralised. Fails if
  /// the result no longer fits the identifier length limit.
  pub fn table_name(&self) -> Result<Ident> {
    let snake = self.snake_case().0;
    Self::within_limit(pluralize(&snake))
  }

  /// Relational column name for a property.
  pub fn column_name(&self) -> Ident { self.snake_case() }

  /// Double-quoted relational form.
  pub fn sql(&self) -> Quoted<'_> { Quoted { ident: self, quote: '"' } }

  /// Backtick-quoted graph form.
  pub fn cypher(&self) -> Quoted<'_> { Quoted { ident: self, quote: '`' } }

  /// Joins parts into a derived object name (`idx_lenders_rate`). Names past
  /// the identifier length limit are rejected rather than truncated, since
  /// two truncated names can collide.
  pub fn derived(parts: &[&str]) -> Result<Ident> { Self::within_limit(parts.join("_")) }

  fn within_limit(name: String) -> Result<Ident> {
    if name.len() > MAX_IDENTIFIER_LEN {
      return Err(Error::InvalidIdentifier(format!(
        "{name} (derived name exceeds {MAX_IDENTIFIER_LEN} characters)"
      )));
    }
    Ok(Ident(name))
  }
}

impl fmt::Display for Ident {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Display adapter that writes a quoted identifier. Validated identifiers
/// never contain quote characters, so no escaping is needed.
pub struct Quoted<'a> {
  ident: &'a Ident,
  quote: char,
}

impl fmt::Display for Quoted<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{q}{}{q}", self.ident.0, q = self.quote)
  }
}

fn pluralize(word: &str) -> String {
  let consonant_y = word.len() > 1
    && word.ends_with('y')
    && !word[..word.len() - 1].ends_with(['a', 'e', 'i', 'o', 'u']);
  if consonant_y {
    format!("{}ies", &word[..word.len() - 1])
  } else if ["s", "x", "z", "ch", "sh"].iter().any(|s| word.ends_with(s)) {
    format!("{word}es")
  } else {
    format!("{word}s")
  }
}

/// A single-quoted SQL string literal. Assumes `standard_conforming_strings`,
/// so only the quote character needs doubling.
pub fn sql_string(value: &str) -> String {
  format!("'{}'", value.replace('\'', "''"))
}

/// A single-quoted Cypher string literal.
pub fn cypher_string(value: &str) -> String {
  let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
  format!("'{escaped}'")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ident(s: &str) -> Ident { Ident::parse(s).unwrap() }

  #[test]
  fn accepts_plain_identifiers() {
    for ok in ["Lender", "_internal", "rate2", "loan_amount"] {
      assert!(Ident::parse(ok).is_ok(), "rejected {ok:?}");
    }
  }

  #[test]
  fn rejects_injection_attempts() {
    for bad in [
      "",
      "2fast",
      "Lender; DROP TABLE users",
      "name\"",
      "a-b",
      "Lender`) DETACH DELETE n //",
      "ünïcode",
    ] {
      let err = Ident::parse(bad).unwrap_err();
      assert!(matches!(err, Error::InvalidIdentifier(_)), "accepted {bad:?}");
    }
  }

  #[test]
  fn rejects_overlong_identifiers() {
    assert!(Ident::parse(&"a".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
  }

  #[test]
  fn table_names_are_snake_plural() {
    assert_eq!(ident("Lender").table_name().unwrap().as_str(), "lenders");
    assert_eq!(ident("LoanPolicy").table_name().unwrap().as_str(), "loan_policies");
    assert_eq!(ident("Address").table_name().unwrap().as_str(), "addresses");
    assert_eq!(ident("HTTPGateway").table_name().unwrap().as_str(), "http_gateways");
    assert_eq!(ident("Survey").table_name().unwrap().as_str(), "surveys");
  }

  #[test]
  fn pluralised_names_must_still_fit() {
    // 62 characters parse, but the plural is 63 and then 64.
    let almost = ident(&"a".repeat(MAX_IDENTIFIER_LEN - 1));
    assert_eq!(almost.table_name().unwrap().as_str().len(), MAX_IDENTIFIER_LEN);
    let full = ident(&"a".repeat(MAX_IDENTIFIER_LEN));
    assert!(matches!(full.table_name(), Err(Error::InvalidIdentifier(_))));
    let boxes = ident(&format!("{}box", "a".repeat(MAX_IDENTIFIER_LEN - 4)));
    assert!(boxes.table_name().is_err());
  }

  #[test]
  fn derived_names_are_never_truncated() {
    let long = "b".repeat(40);
    assert!(matches!(
      Ident::derived(&["idx", &long, &long]),
      Err(Error::InvalidIdentifier(_))
    ));
    // Two columns sharing a long prefix would have collided once cut.
    let a = format!("{}_a", "c".repeat(56));
    let b = format!("{}_b", "c".repeat(56));
    assert!(Ident::derived(&["idx", "t", &a]).is_err());
    assert!(Ident::derived(&["idx", "t", &b]).is_err());
    assert_eq!(Ident::derived(&["idx", "lenders", "rate"]).unwrap().as_str(), "idx_lenders_rate");
  }

  #[test]
  fn quoting_is_store_specific() {
    let id = ident("Lender");
    assert_eq!(id.sql().to_string(), "\"Lender\"");
    assert_eq!(id.cypher().to_string(), "`Lender`");
  }

  #[test]
  fn string_literals_escape_per_store() {
    assert_eq!(sql_string("O'Brien"), "'O''Brien'");
    assert_eq!(sql_string(r"a\b"), r"'a\b'");
    assert_eq!(cypher_string("O'Brien"), r"'O\'Brien'");
    assert_eq!(cypher_string(r"a\b"), r"'a\\b'");
  }
}
