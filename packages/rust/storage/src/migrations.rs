//! SQL migration definitions for the espforge catalog database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

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
        description: "Initial schema: components, config_variables, scrape_jobs, FTS5",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Canonical component records
CREATE TABLE IF NOT EXISTS components (
    key            TEXT PRIMARY KEY,
    name           TEXT NOT NULL,
    category       TEXT NOT NULL,
    description    TEXT NOT NULL DEFAULT '',
    platforms_json TEXT NOT NULL DEFAULT '[]',
    source_url     TEXT NOT NULL,
    checksum       TEXT NOT NULL,
    refreshed_at   TEXT NOT NULL,
    checked_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_components_category ON components(category);

-- Declared variables, in documentation order
CREATE TABLE IF NOT EXISTS config_variables (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    component_key    TEXT NOT NULL REFERENCES components(key) ON DELETE CASCADE,
    position         INTEGER NOT NULL,
    name             TEXT NOT NULL,
    var_type         TEXT NOT NULL,
    required         INTEGER NOT NULL DEFAULT 0,
    default_json     TEXT,
    constraints_json TEXT NOT NULL DEFAULT '{}',
    description      TEXT NOT NULL DEFAULT '',
    UNIQUE(component_key, name)
);

CREATE INDEX IF NOT EXISTS idx_config_variables_component ON config_variables(component_key);

-- Scrape job history
CREATE TABLE IF NOT EXISTS scrape_jobs (
    id            TEXT PRIMARY KEY,
    locator       TEXT NOT NULL,
    started_at    TEXT NOT NULL,
    finished_at   TEXT,
    status        TEXT NOT NULL DEFAULT 'running',
    component_key TEXT,
    error         TEXT
);

-- Full-text search on components
CREATE VIRTUAL TABLE IF NOT EXISTS components_fts USING fts5(
    key,
    name,
    description,
    content=components,
    content_rowid=rowid
);

-- Triggers to keep FTS in sync with components table
CREATE TRIGGER IF NOT EXISTS components_fts_insert AFTER INSERT ON components BEGIN
    INSERT INTO components_fts(rowid, key, name, description)
    VALUES (new.rowid, new.key, new.name, new.description);
END;

CREATE TRIGGER IF NOT EXISTS components_fts_delete AFTER DELETE ON components BEGIN
    INSERT INTO components_fts(components_fts, rowid, key, name, description)
    VALUES ('delete', old.rowid, old.key, old.name, old.description);
END;

CREATE TRIGGER IF NOT EXISTS components_fts_update AFTER UPDATE ON components BEGIN
    INSERT INTO components_fts(components_fts, rowid, key, name, description)
    VALUES ('delete', old.rowid, old.key, old.name, old.description);
    INSERT INTO components_fts(rowid, key, name, description)
    VALUES (new.rowid, new.key, new.name, new.description);
END;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
