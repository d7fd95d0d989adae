//! SQL migration definitions for the CatalogSync database.
//!
//! Migrations are applied in order on database open. Several import jobs may
//! open the same file at once, so every statement is idempotent.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: products document collection, import_runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Product documents, one per imported SKU row
CREATE TABLE IF NOT EXISTS products (
    doc_id     TEXT PRIMARY KEY,
    doc        TEXT NOT NULL CHECK (json_valid(doc)),
    written_at TEXT NOT NULL
);

-- Import job history
CREATE TABLE IF NOT EXISTS import_runs (
    id          TEXT PRIMARY KEY,
    vendor      TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    status      TEXT NOT NULL DEFAULT 'running',
    stats_json  TEXT
);

CREATE INDEX IF NOT EXISTS idx_import_runs_vendor ON import_runs(vendor);

INSERT OR IGNORE INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
