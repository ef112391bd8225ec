//! SQL schema for the ontover SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! schema generation.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Rows are written once. Only is_active and published_at change afterwards,
-- and only through activation.
CREATE TABLE IF NOT EXISTS ontology_versions (
    id            TEXT PRIMARY KEY,
    tenant_id     TEXT NOT NULL,
    ontology_name TEXT NOT NULL,
    version       TEXT NOT NULL,
    model_json    TEXT NOT NULL,
    is_active     INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,   -- RFC 3339 UTC
    created_by    TEXT NOT NULL,
    branch        TEXT NOT NULL DEFAULT 'main',
    published_at  TEXT,
    UNIQUE (tenant_id, ontology_name, version)
);

-- At most one active version per (tenant, ontology).
CREATE UNIQUE INDEX IF NOT EXISTS ontology_versions_active_idx
    ON ontology_versions(tenant_id, ontology_name) WHERE is_active = 1;

-- Append-only history. Scripts are never modified; only the status moves.
CREATE TABLE IF NOT EXISTS migrations (
    migration_id           TEXT PRIMARY KEY,
    tenant_id              TEXT NOT NULL,
    ontology_name          TEXT NOT NULL,
    from_version           TEXT NOT NULL,
    to_version             TEXT NOT NULL,
    sql_script             TEXT NOT NULL,
    sql_rollback_script    TEXT NOT NULL,
    cypher_script          TEXT NOT NULL,
    cypher_rollback_script TEXT NOT NULL,
    generated_at           TEXT NOT NULL,
    change_count           INTEGER NOT NULL,
    status                 TEXT NOT NULL,   -- label, for ad-hoc queries
    status_json            TEXT NOT NULL,   -- full MigrationStatus
    recorded_at            TEXT NOT NULL,
    applied_at             TEXT
);

CREATE INDEX IF NOT EXISTS migrations_key_idx
    ON migrations(tenant_id, ontology_name);

-- One unapplied record per (tenant, ontology, from, to).
CREATE UNIQUE INDEX IF NOT EXISTS migrations_pending_idx
    ON migrations(tenant_id, ontology_name, from_version, to_version)
    WHERE status IN ('generated', 'apply_failed');

CREATE TABLE IF NOT EXISTS deprecation_policies (
    policy_id               TEXT PRIMARY KEY,
    tenant_id               TEXT NOT NULL,
    change_id               TEXT NOT NULL,
    scheduled_at            TEXT NOT NULL,
    deprecation_date        TEXT NOT NULL,
    status                  TEXT NOT NULL,   -- 'scheduled' | 'completed'
    completed_at            TEXT,
    deprecated_entity_name  TEXT NOT NULL,
    replacement_entity_name TEXT
);

CREATE TABLE IF NOT EXISTS deprecation_notifications (
    notification_id   TEXT PRIMARY KEY,
    policy_id         TEXT NOT NULL REFERENCES deprecation_policies(policy_id),
    scheduled_date    TEXT NOT NULL,
    notification_type TEXT NOT NULL,   -- '6_months' ... 'final'
    message           TEXT NOT NULL,
    sent              INTEGER NOT NULL DEFAULT 0,
    sent_at           TEXT,
    recipients        TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS deprecation_policies_tenant_idx
    ON deprecation_policies(tenant_id);
CREATE INDEX IF NOT EXISTS deprecation_notifications_due_idx
    ON deprecation_notifications(sent, scheduled_date);

PRAGMA user_version = 1;
";
