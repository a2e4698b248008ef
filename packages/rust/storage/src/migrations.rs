//! SQL migration definitions for the govsite database.
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
    vec![
        Migration {
            version: 1,
            description: "Initial schema: sites, tags, sources, source_default_tags",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS sites (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname   TEXT NOT NULL,
    port       INTEGER NOT NULL DEFAULT 80,
    is_default INTEGER NOT NULL DEFAULT 0,
    UNIQUE(hostname, port)
);

-- Controlled tag vocabulary (global)
CREATE TABLE IF NOT EXISTS tags (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL
);

-- Content discovery sources, unique per (site_id, url)
CREATE TABLE IF NOT EXISTS sources (
    id                       INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id                  INTEGER NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
    sort_order               INTEGER NOT NULL DEFAULT 0,
    name                     TEXT NOT NULL DEFAULT '',
    url                      TEXT NOT NULL,
    disable_tls_verification INTEGER NOT NULL DEFAULT 0,
    created_at               TEXT NOT NULL,
    updated_at               TEXT NOT NULL,
    UNIQUE(site_id, url)
);

CREATE INDEX IF NOT EXISTS idx_sources_site ON sources(site_id, sort_order);

-- Ordered default tags per source
CREATE TABLE IF NOT EXISTS source_default_tags (
    source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
    tag_id    INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    position  INTEGER NOT NULL,
    PRIMARY KEY (source_id, tag_id)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "External content items, item tags, sync run history",
            sql: r#"
CREATE TABLE IF NOT EXISTS external_items (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    key           TEXT NOT NULL UNIQUE,
    source_id     INTEGER REFERENCES sources(id) ON DELETE SET NULL,
    url           TEXT NOT NULL UNIQUE,
    title         TEXT NOT NULL DEFAULT '',
    summary       TEXT NOT NULL DEFAULT '',
    published_at  TEXT,
    created_at    TEXT,
    updated_at    TEXT,
    hidden        INTEGER NOT NULL DEFAULT 0,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    first_seen_at TEXT NOT NULL,
    last_seen_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_external_items_source ON external_items(source_id);

CREATE TABLE IF NOT EXISTS external_item_tags (
    item_id INTEGER NOT NULL REFERENCES external_items(id) ON DELETE CASCADE,
    tag_id  INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (item_id, tag_id)
);

CREATE INDEX IF NOT EXISTS idx_external_item_tags_tag ON external_item_tags(tag_id);

-- Sync history per source
CREATE TABLE IF NOT EXISTS sync_runs (
    id          TEXT PRIMARY KEY,
    source_id   INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT,
    error       TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_source ON sync_runs(source_id);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
