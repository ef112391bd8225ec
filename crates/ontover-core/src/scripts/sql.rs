//! Relational (PostgreSQL) script generation.
//!
//! Entities map to pluralised snake-case tables, properties to snake-case
//! columns, relationships to junction tables named `<source>_<relationship>`.
//! Every statement is guarded with `IF [NOT] EXISTS` or wrapped in a `DO`
//! block that checks the catalog first.
//!
//! Derived object names embed the entity's table or snake-case name, so an
//! entity rename also renames its indexes, its `ck_` constraints and the
//! junction tables it is the source of.

use super::{Dialect, PropertyType, Script, ValidationRule, describe};
use crate::{
  Result,
  change::{ChangeType, OntologyChange},
  ident::{Ident, sql_string},
};

/// Render `changes`, in the order given, as one SQL script.
pub fn render<'a>(
  title: &str,
  changes: impl IntoIterator<Item = &'a OntologyChange>,
) -> Result<Script> {
  let mut script = Script::new(Dialect::Sql);
  script.comment(title);
  for change in changes {
    script.comment(describe(change));
    fragment(&mut script, change)?;
  }
  Ok(script)
}

fn fragment(script: &mut Script, change: &OntologyChange) -> Result<()> {
  match change.change_type {
    ChangeType::EntityAdded => {
      create_table(script, &Ident::parse(change.require_entity()?)?)?;
    }
    ChangeType::EntityRemoved => {
      let table = Ident::parse(change.require_entity()?)?.table_name()?;
      script.statement(format!("DROP TABLE IF EXISTS {} CASCADE", table.sql()));
    }
    ChangeType::EntityRenamed => {
      let old = Ident::parse(change.require_old()?)?;
      let new = Ident::parse(change.require_new()?)?;
      let (old_table, new_table) = (old.table_name()?, new.table_name()?);
      rename_table(script, &old_table, &new_table);
      rename_constraints(script, &old_table, &new_table);
      rename_junctions(script, &old, &new, &new_table);
    }
    ChangeType::PropertyAdded => {
      let table = Ident::parse(change.require_entity()?)?.table_name()?;
      let column = Ident::parse(change.require_property()?)?.column_name();
      let ty = PropertyType::parse(change.new_value.as_deref());
      add_column(script, &table, &column, ty)?;
    }
    ChangeType::PropertyRemoved => {
      let table = Ident::parse(change.require_entity()?)?.table_name()?;
      let column = Ident::parse(change.require_property()?)?.column_name();
      script.statement(format!(
        "DROP INDEX IF EXISTS {}",
        index_name(&table, &column)?.sql()
      ));
      script.statement(format!(
        "ALTER TABLE IF EXISTS {} DROP COLUMN IF EXISTS {}",
        table.sql(),
        column.sql()
      ));
    }
    ChangeType::PropertyRenamed => {
      let table = Ident::parse(change.require_entity()?)?.table_name()?;
      let old = Ident::parse(change.require_old()?)?.column_name();
      let new = Ident::parse(change.require_new()?)?.column_name();
      rename_column(script, &table, &old, &new)?;
    }
    ChangeType::PropertyTypeChanged => {
      let table = Ident::parse(change.require_entity()?)?.table_name()?;
      let column = Ident::parse(change.require_property()?)?.column_name();
      let ty = PropertyType::parse(Some(change.require_new()?));
      let cast = match ty {
        PropertyType::Array | PropertyType::Object => format!("to_jsonb({})", column.sql()),
        _ => format!("{}::{}", column.sql(), column_type(ty)),
      };
      script.statement(format!(
        "ALTER TABLE IF EXISTS {} ALTER COLUMN {} TYPE {} USING {cast}",
        table.sql(),
        column.sql(),
        column_type(ty)
      ));
    }
    ChangeType::RelationshipAdded => {
      let source = Ident::parse(change.require_entity()?)?;
      let relationship = Ident::parse(change.require_property()?)?;
      let target = Ident::parse(change.require_new()?)?;
      create_junction(script, &source, &relationship, &target)?;
    }
    ChangeType::RelationshipRemoved => {
      let source = Ident::parse(change.require_entity()?)?;
      let relationship = Ident::parse(change.require_property()?)?;
      script.statement(format!(
        "DROP TABLE IF EXISTS {} CASCADE",
        junction_name(&source, &relationship)?.sql()
      ));
    }
    ChangeType::RelationshipRenamed => {
      let source = Ident::parse(change.require_entity()?)?;
      let old = Ident::parse(change.require_old()?)?;
      let new = Ident::parse(change.require_new()?)?;
      rename_table(
        script,
        &junction_name(&source, &old)?,
        &junction_name(&source, &new)?,
      );
    }
    ChangeType::ValidationAdded => {
      let table = Ident::parse(change.require_entity()?)?.table_name()?;
      let column = Ident::parse(change.require_property()?)?.column_name();
      let rule = ValidationRule::parse(change.require_new()?)?;
      let name = constraint_name(&table, &column, &rule)?;
      script.statement(format!(
        "ALTER TABLE IF EXISTS {} DROP CONSTRAINT IF EXISTS {}",
        table.sql(),
        name.sql()
      ));
      script.statement(format!(
        "ALTER TABLE IF EXISTS {} ADD CONSTRAINT {} CHECK ({})",
        table.sql(),
        name.sql(),
        check_expression(&column, &rule)
      ));
    }
    ChangeType::ValidationRemoved => {
      let table = Ident::parse(change.require_entity()?)?.table_name()?;
      let column = Ident::parse(change.require_property()?)?.column_name();
      let rule = ValidationRule::parse(change.require_old()?)?;
      script.statement(format!(
        "ALTER TABLE IF EXISTS {} DROP CONSTRAINT IF EXISTS {}",
        table.sql(),
        constraint_name(&table, &column, &rule)?.sql()
      ));
    }
  }
  Ok(())
}

// ─── Naming ──────────────────────────────────────────────────────────────────

fn index_name(table: &Ident, column: &Ident) -> Result<Ident> {
  Ident::derived(&["idx", table.as_str(), column.as_str()])
}

fn junction_name(source: &Ident, relationship: &Ident) -> Result<Ident> {
  Ident::derived(&[source.snake_case().as_str(), relationship.snake_case().as_str()])
}

fn constraint_name(table: &Ident, column: &Ident, rule: &ValidationRule) -> Result<Ident> {
  Ident::derived(&["ck", table.as_str(), column.as_str(), rule.slug()])
}

// ─── Types and defaults ──────────────────────────────────────────────────────

fn column_type(ty: PropertyType) -> &'static str {
  match ty {
    PropertyType::String | PropertyType::Unknown => "TEXT",
    PropertyType::Integer => "BIGINT",
    PropertyType::Decimal => "NUMERIC",
    PropertyType::Boolean => "BOOLEAN",
    PropertyType::Date => "DATE",
    PropertyType::DateTime => "TIMESTAMPTZ",
    PropertyType::Array | PropertyType::Object => "JSONB",
  }
}

/// Default for a newly added column, so existing rows satisfy it.
fn column_default(ty: PropertyType) -> &'static str {
  match ty {
    PropertyType::String => "''",
    PropertyType::Integer => "0",
    PropertyType::Decimal => "0.0",
    PropertyType::Boolean => "false",
    PropertyType::Date | PropertyType::DateTime => "CURRENT_TIMESTAMP",
    PropertyType::Array => "'[]'::jsonb",
    PropertyType::Object => "'{}'::jsonb",
    PropertyType::Unknown => "NULL",
  }
}

// ─── Statements ──────────────────────────────────────────────────────────────

fn create_table(script: &mut Script, entity: &Ident) -> Result<()> {
  let table = entity.table_name()?;
  let tenant = Ident::derived(&["tenant_id"])?;
  script.statement(format!(
    "CREATE TABLE IF NOT EXISTS {} (\n  \
     \"id\" UUID PRIMARY KEY DEFAULT gen_random_uuid(),\n  \
     \"tenant_id\" UUID NOT NULL,\n  \
     \"created_at\" TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,\n  \
     \"updated_at\" TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP\n)",
    table.sql()
  ));
  script.statement(format!(
    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
    index_name(&table, &tenant)?.sql(),
    table.sql(),
    tenant.sql()
  ));
  Ok(())
}

fn add_column(
  script: &mut Script,
  table: &Ident,
  column: &Ident,
  ty: PropertyType,
) -> Result<()> {
  script.statement(format!(
    "ALTER TABLE IF EXISTS {} ADD COLUMN IF NOT EXISTS {} {} DEFAULT {}",
    table.sql(),
    column.sql(),
    column_type(ty),
    column_default(ty)
  ));
  let method = match ty {
    PropertyType::Array | PropertyType::Object => " USING GIN",
    _ => "",
  };
  script.statement(format!(
    "CREATE INDEX IF NOT EXISTS {} ON {}{method} ({})",
    index_name(table, column)?.sql(),
    table.sql(),
    column.sql()
  ));
  Ok(())
}

/// Renames a table and every `idx_<old>_*` index that belongs to it.
fn rename_table(script: &mut Script, old: &Ident, new: &Ident) {
  script.statement(format!(
    "ALTER TABLE IF EXISTS {} RENAME TO {}",
    old.sql(),
    new.sql()
  ));
  let old_prefix = format!("idx_{old}_");
  let new_prefix = format!("idx_{new}_");
  script.statement(format!(
    "DO $$\n\
     DECLARE idx record;\n\
     BEGIN\n  \
       FOR idx IN SELECT indexname FROM pg_indexes\n    \
         WHERE schemaname = current_schema() AND tablename = {table}\n      \
         AND left(indexname, {len}) = {old_prefix} LOOP\n    \
         EXECUTE format('ALTER INDEX IF EXISTS %I RENAME TO %I', idx.indexname,\n      \
           {new_prefix} || substr(idx.indexname, {skip}));\n  \
       END LOOP;\n\
     END $$",
    table = sql_string(new.as_str()),
    len = old_prefix.len(),
    old_prefix = sql_string(&old_prefix),
    new_prefix = sql_string(&new_prefix),
    skip = old_prefix.len() + 1,
  ));
}

/// Renames the `ck_<old>_*` check constraints of a table already renamed to
/// `new`.
fn rename_constraints(script: &mut Script, old: &Ident, new: &Ident) {
  let old_prefix = format!("ck_{old}_");
  let new_prefix = format!("ck_{new}_");
  script.statement(format!(
    "DO $$\n\
     DECLARE ck record;\n\
     BEGIN\n  \
       FOR ck IN SELECT conname FROM pg_constraint\n    \
         WHERE conrelid = to_regclass(quote_ident({table})) AND contype = 'c'\n      \
         AND left(conname, {len}) = {old_prefix} LOOP\n    \
         EXECUTE format('ALTER TABLE %I RENAME CONSTRAINT %I TO %I', {table},\n      \
           ck.conname, {new_prefix} || substr(ck.conname, {skip}));\n  \
       END LOOP;\n\
     END $$",
    table = sql_string(new.as_str()),
    len = old_prefix.len(),
    old_prefix = sql_string(&old_prefix),
    new_prefix = sql_string(&new_prefix),
    skip = old_prefix.len() + 1,
  ));
}

/// Renames the `<old>_<relationship>` junction tables whose `source_id`
/// references the renamed entity, along with their `idx_` indexes.
fn rename_junctions(script: &mut Script, old: &Ident, new: &Ident, new_table: &Ident) {
  let old_prefix = format!("{}_", old.snake_case());
  let new_prefix = format!("{}_", new.snake_case());
  script.statement(format!(
    "DO $$\n\
     DECLARE j record; idx record;\n\
     BEGIN\n  \
       FOR j IN SELECT c.relname::text AS old_name,\n      \
           {new_prefix} || substr(c.relname, {skip}) AS new_name\n    \
         FROM pg_constraint k\n    \
         JOIN pg_class c ON c.oid = k.conrelid\n    \
         JOIN pg_attribute a ON a.attrelid = k.conrelid AND a.attnum = k.conkey[1]\n    \
         WHERE k.contype = 'f' AND k.confrelid = to_regclass(quote_ident({table}))\n      \
           AND a.attname = 'source_id' AND c.relnamespace = current_schema()::regnamespace\n      \
           AND left(c.relname, {len}) = {old_prefix} LOOP\n    \
         EXECUTE format('ALTER TABLE IF EXISTS %I RENAME TO %I', j.old_name, j.new_name);\n    \
         FOR idx IN SELECT indexname FROM pg_indexes\n      \
           WHERE schemaname = current_schema() AND tablename = j.new_name\n        \
           AND left(indexname, length(j.old_name) + 5) = 'idx_' || j.old_name || '_' LOOP\n      \
           EXECUTE format('ALTER INDEX IF EXISTS %I RENAME TO %I', idx.indexname,\n        \
             'idx_' || j.new_name || substr(idx.indexname, length(j.old_name) + 5));\n    \
         END LOOP;\n  \
       END LOOP;\n\
     END $$",
    table = sql_string(new_table.as_str()),
    len = old_prefix.len(),
    old_prefix = sql_string(&old_prefix),
    new_prefix = sql_string(&new_prefix),
    skip = old_prefix.len() + 1,
  ));
}

fn rename_column(script: &mut Script, table: &Ident, old: &Ident, new: &Ident) -> Result<()> {
  script.statement(format!(
    "DO $$\n\
     BEGIN\n  \
       IF EXISTS (SELECT 1 FROM information_schema.columns\n    \
         WHERE table_schema = current_schema() AND table_name = {table_lit}\n      \
         AND column_name = {old_lit})\n  \
       AND NOT EXISTS (SELECT 1 FROM information_schema.columns\n    \
         WHERE table_schema = current_schema() AND table_name = {table_lit}\n      \
         AND column_name = {new_lit}) THEN\n    \
         ALTER TABLE {table} RENAME COLUMN {old} TO {new};\n  \
       END IF;\n\
     END $$",
    table_lit = sql_string(table.as_str()),
    old_lit = sql_string(old.as_str()),
    new_lit = sql_string(new.as_str()),
    table = table.sql(),
    old = old.sql(),
    new = new.sql(),
  ));
  script.statement(format!(
    "ALTER INDEX IF EXISTS {} RENAME TO {}",
    index_name(table, old)?.sql(),
    index_name(table, new)?.sql()
  ));
  Ok(())
}

fn create_junction(
  script: &mut Script,
  source: &Ident,
  relationship: &Ident,
  target: &Ident,
) -> Result<()> {
  let junction = junction_name(source, relationship)?;
  let target_id = Ident::derived(&["target_id"])?;
  script.statement(format!(
    "CREATE TABLE IF NOT EXISTS {} (\n  \
     \"source_id\" UUID NOT NULL REFERENCES {} (\"id\") ON DELETE CASCADE,\n  \
     \"target_id\" UUID NOT NULL REFERENCES {} (\"id\") ON DELETE CASCADE,\n  \
     \"created_at\" TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,\n  \
     PRIMARY KEY (\"source_id\", \"target_id\")\n)",
    junction.sql(),
    source.table_name()?.sql(),
    target.table_name()?.sql()
  ));
  // The primary key already covers lookups by source.
  script.statement(format!(
    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
    index_name(&junction, &target_id)?.sql(),
    junction.sql(),
    target_id.sql()
  ));
  Ok(())
}

fn check_expression(column: &Ident, rule: &ValidationRule) -> String {
  let col = column.sql();
  match rule {
    ValidationRule::Required => format!("{col} IS NOT NULL"),
    ValidationRule::Positive => format!("{col} > 0"),
    ValidationRule::Min(n) => format!("{col} >= {n}"),
    ValidationRule::Max(n) => format!("{col} <= {n}"),
    ValidationRule::MinLength(n) => format!("char_length({col}) >= {n}"),
    ValidationRule::MaxLength(n) => format!("char_length({col}) <= {n}"),
    ValidationRule::OneOf(values) => {
      let list: Vec<String> = values.iter().map(|v| sql_string(v)).collect();
      format!("{col} IN ({})", list.join(", "))
    }
  }
}
