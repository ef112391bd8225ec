//! Graph-store (Cypher) script generation.
//!
//! Entities are node labels, properties are node properties, relationships
//! are relationship types. Schema objects use `IF [NOT] EXISTS`; data
//! rewrites are `MATCH` statements that find nothing left to do on a second
//! run. Property type changes are relational-only and emit a comment.
//!
//! Indexes and constraints are bound to a label, so renaming an entity moves
//! every property index (and `required` constraint) declared on it in the
//! source model's [`Catalog`].

use super::{Dialect, PropertyType, Script, ValidationRule, describe};
use crate::{
  Result,
  change::{ChangeType, OntologyChange},
  ident::Ident,
  model::Catalog,
};

/// Render `changes`, in the order given, as one Cypher script. `catalog`
/// describes the model the changes start from.
pub fn render<'a>(
  title: &str,
  changes: impl IntoIterator<Item = &'a OntologyChange>,
  catalog: &Catalog,
) -> Result<Script> {
  let mut script = Script::new(Dialect::Cypher);
  script.comment(title);
  for change in changes {
    script.comment(describe(change));
    fragment(&mut script, change, catalog)?;
  }
  Ok(script)
}

fn fragment(script: &mut Script, change: &OntologyChange, catalog: &Catalog) -> Result<()> {
  match change.change_type {
    ChangeType::EntityAdded => {
      create_label(script, &Ident::parse(change.require_entity()?)?)?;
    }
    ChangeType::EntityRemoved => {
      let label = Ident::parse(change.require_entity()?)?;
      script.statement(format!("MATCH (n:{}) DETACH DELETE n", label.cypher()));
      drop_label(script, &label)?;
    }
    ChangeType::EntityRenamed => {
      let old = Ident::parse(change.require_old()?)?;
      let new = Ident::parse(change.require_new()?)?;
      script.statement(format!(
        "MATCH (n:{old}) SET n:{new} REMOVE n:{old}",
        old = old.cypher(),
        new = new.cypher()
      ));
      drop_label(script, &old)?;
      create_label(script, &new)?;
      move_property_schema(script, &old, &new, catalog)?;
    }
    ChangeType::PropertyAdded => {
      let label = Ident::parse(change.require_entity()?)?;
      let prop = Ident::parse(change.require_property()?)?;
      let ty = PropertyType::parse(change.new_value.as_deref());
      script.statement(format!(
        "MATCH (n:{}) WHERE n.{p} IS NULL SET n.{p} = {}",
        label.cypher(),
        default_value(ty),
        p = prop.cypher()
      ));
      create_property_index(script, &label, &prop)?;
    }
    ChangeType::PropertyRemoved => {
      let label = Ident::parse(change.require_entity()?)?;
      let prop = Ident::parse(change.require_property()?)?;
      script.statement(format!(
        "DROP INDEX {} IF EXISTS",
        property_index(&label, &prop)?.cypher()
      ));
      script.statement(format!(
        "MATCH (n:{}) WHERE n.{p} IS NOT NULL REMOVE n.{p}",
        label.cypher(),
        p = prop.cypher()
      ));
    }
    ChangeType::PropertyRenamed => {
      let label = Ident::parse(change.require_entity()?)?;
      let old = Ident::parse(change.require_old()?)?;
      let new = Ident::parse(change.require_new()?)?;
      // Copy, then delete: nodes already migrated no longer match.
      script.statement(format!(
        "MATCH (n:{}) WHERE n.{old} IS NOT NULL SET n.{new} = n.{old} REMOVE n.{old}",
        label.cypher(),
        old = old.cypher(),
        new = new.cypher()
      ));
      script.statement(format!(
        "DROP INDEX {} IF EXISTS",
        property_index(&label, &old)?.cypher()
      ));
      create_property_index(script, &label, &new)?;
    }
    ChangeType::PropertyTypeChanged => {
      let label = Ident::parse(change.require_entity()?)?;
      let prop = Ident::parse(change.require_property()?)?;
      script.comment(format!(
        "{label}.{prop}: property types are not enforced by the graph store"
      ));
    }
    ChangeType::RelationshipAdded => {
      let rel = Ident::parse(change.require_property()?)?;
      Ident::parse(change.require_entity()?)?;
      Ident::parse(change.require_new()?)?;
      create_relationship_index(script, &rel)?;
    }
    ChangeType::RelationshipRemoved => {
      let source = Ident::parse(change.require_entity()?)?;
      let rel = Ident::parse(change.require_property()?)?;
      script.statement(format!(
        "MATCH (:{})-[r:{}]->() DELETE r",
        source.cypher(),
        rel.cypher()
      ));
      script.statement(format!(
        "DROP INDEX {} IF EXISTS",
        relationship_index(&rel)?.cypher()
      ));
    }
    ChangeType::RelationshipRenamed => {
      let source = Ident::parse(change.require_entity()?)?;
      let old = Ident::parse(change.require_old()?)?;
      let new = Ident::parse(change.require_new()?)?;
      script.statement(format!(
        "MATCH (a:{})-[r:{}]->(b) CREATE (a)-[r2:{}]->(b) SET r2 = properties(r) DELETE r",
        source.cypher(),
        old.cypher(),
        new.cypher()
      ));
      script.statement(format!(
        "DROP INDEX {} IF EXISTS",
        relationship_index(&old)?.cypher()
      ));
      create_relationship_index(script, &new)?;
    }
    ChangeType::ValidationAdded => {
      let label = Ident::parse(change.require_entity()?)?;
      let prop = Ident::parse(change.require_property()?)?;
      let rule = ValidationRule::parse(change.require_new()?)?;
      if rule == ValidationRule::Required {
        script.statement(format!(
          "CREATE CONSTRAINT {} IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS NOT NULL",
          required_constraint(&label, &prop)?.cypher(),
          label.cypher(),
          prop.cypher()
        ));
      } else {
        relational_only(script, &label, &prop, &rule);
      }
    }
    ChangeType::ValidationRemoved => {
      let label = Ident::parse(change.require_entity()?)?;
      let prop = Ident::parse(change.require_property()?)?;
      let rule = ValidationRule::parse(change.require_old()?)?;
      if rule == ValidationRule::Required {
        script.statement(format!(
          "DROP CONSTRAINT {} IF EXISTS",
          required_constraint(&label, &prop)?.cypher()
        ));
      } else {
        relational_only(script, &label, &prop, &rule);
      }
    }
  }
  Ok(())
}

// ─── Naming ──────────────────────────────────────────────────────────────────

fn id_constraint(label: &Ident) -> Result<Ident> {
  Ident::derived(&[label.snake_case().as_str(), "id_unique"])
}

fn tenant_index(label: &Ident) -> Result<Ident> {
  Ident::derived(&[label.snake_case().as_str(), "tenant_idx"])
}

fn property_index(label: &Ident, prop: &Ident) -> Result<Ident> {
  Ident::derived(&[label.snake_case().as_str(), prop.snake_case().as_str(), "idx"])
}

fn relationship_index(rel: &Ident) -> Result<Ident> {
  Ident::derived(&["rel", rel.snake_case().as_str(), "tenant_idx"])
}

fn required_constraint(label: &Ident, prop: &Ident) -> Result<Ident> {
  Ident::derived(&[label.snake_case().as_str(), prop.snake_case().as_str(), "required"])
}

// ─── Statements ──────────────────────────────────────────────────────────────

/// Maps cannot be stored as node properties, so objects default to their
/// serialised empty form.
fn default_value(ty: PropertyType) -> &'static str {
  match ty {
    PropertyType::String => "''",
    PropertyType::Integer => "0",
    PropertyType::Decimal => "0.0",
    PropertyType::Boolean => "false",
    PropertyType::Date => "date()",
    PropertyType::DateTime => "datetime()",
    PropertyType::Array => "[]",
    PropertyType::Object => "'{}'",
    PropertyType::Unknown => "null",
  }
}

fn create_label(script: &mut Script, label: &Ident) -> Result<()> {
  script.statement(format!(
    "CREATE CONSTRAINT {} IF NOT EXISTS FOR (n:{}) REQUIRE n.`id` IS UNIQUE",
    id_constraint(label)?.cypher(),
    label.cypher()
  ));
  script.statement(format!(
    "CREATE INDEX {} IF NOT EXISTS FOR (n:{}) ON (n.`tenantId`)",
    tenant_index(label)?.cypher(),
    label.cypher()
  ));
  Ok(())
}

fn drop_label(script: &mut Script, label: &Ident) -> Result<()> {
  script.statement(format!("DROP INDEX {} IF EXISTS", tenant_index(label)?.cypher()));
  script.statement(format!(
    "DROP CONSTRAINT {} IF EXISTS",
    id_constraint(label)?.cypher()
  ));
  Ok(())
}

fn create_property_index(script: &mut Script, label: &Ident, prop: &Ident) -> Result<()> {
  script.statement(format!(
    "CREATE INDEX {} IF NOT EXISTS FOR (n:{}) ON (n.{})",
    property_index(label, prop)?.cypher(),
    label.cypher(),
    prop.cypher()
  ));
  Ok(())
}

fn create_relationship_index(script: &mut Script, rel: &Ident) -> Result<()> {
  script.statement(format!(
    "CREATE INDEX {} IF NOT EXISTS FOR ()-[r:{}]-() ON (r.`tenantId`)",
    relationship_index(rel)?.cypher(),
    rel.cypher()
  ));
  Ok(())
}

/// Move the property indexes and `required` constraints of a renamed label.
/// A rollback renames back to the name the catalog knows, so either side of
/// the rename may be the one declared.
fn move_property_schema(
  script: &mut Script,
  old: &Ident,
  new: &Ident,
  catalog: &Catalog,
) -> Result<()> {
  let declared = match catalog.properties(old.as_str()) {
    [] => catalog.properties(new.as_str()),
    props => props,
  };
  for property in declared {
    let prop = Ident::parse(&property.name)?;
    script.statement(format!(
      "DROP INDEX {} IF EXISTS",
      property_index(old, &prop)?.cypher()
    ));
    create_property_index(script, new, &prop)?;
    if property.required {
      script.statement(format!(
        "DROP CONSTRAINT {} IF EXISTS",
        required_constraint(old, &prop)?.cypher()
      ));
      script.statement(format!(
        "CREATE CONSTRAINT {} IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS NOT NULL",
        required_constraint(new, &prop)?.cypher(),
        new.cypher(),
        prop.cypher()
      ));
    }
  }
  Ok(())
}

fn relational_only(script: &mut Script, label: &Ident, prop: &Ident, rule: &ValidationRule) {
  script.comment(format!(
    "{label}.{prop}: {} is enforced by the relational store only",
    rule.slug()
  ));
}
