//! DDL and the ordered forward-only migration list.
//!
//! The schema version of a store file is `PRAGMA user_version`, equal to the
//! number of applied migrations. Migrations run sequentially, each in its
//! own transaction; a migration that rebuilds a table disables foreign keys
//! for its duration only. Openers refuse files whose version exceeds
//! [`CURRENT_SCHEMA_VERSION`].
//!
//! Timestamps are TEXT in ISO 8601 (SQLite has no datetime type); booleans
//! are INTEGER; JSON blobs are TEXT.

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;

/// Number of known migrations; the version a fresh file ends up at.
pub const CURRENT_SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

/// Meta key recording that the full-text index could not be built.
pub const META_FTS_DISABLED: &str = "fts_disabled";

/// How a migration is applied.
pub enum MigrationKind {
    /// A batch of SQL statements.
    Sql(&'static str),
    /// Arbitrary logic, for migrations that must degrade gracefully.
    Rust(fn(&Connection) -> Result<()>),
}

/// One entry in the ordered migration list.
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub kind: MigrationKind,
    /// Table-rebuild migrations disable referential integrity while they
    /// run; it is restored immediately afterwards.
    pub disable_foreign_keys: bool,
}

/// The ordered, forward-only migration list. Append only; never reorder or
/// edit an applied entry.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        kind: MigrationKind::Sql(INITIAL_SCHEMA),
        disable_foreign_keys: false,
    },
    Migration {
        version: 2,
        name: "issue_field_bag",
        kind: MigrationKind::Sql(
            "ALTER TABLE issues ADD COLUMN fields TEXT NOT NULL DEFAULT '{}';",
        ),
        disable_foreign_keys: false,
    },
    Migration {
        version: 3,
        name: "typed_dependency_edges",
        kind: MigrationKind::Sql(TYPED_EDGES_REBUILD),
        disable_foreign_keys: true,
    },
    Migration {
        version: 4,
        name: "fulltext_index",
        kind: MigrationKind::Rust(apply_fulltext_index),
        disable_foreign_keys: false,
    },
    Migration {
        version: 5,
        name: "covering_indexes",
        kind: MigrationKind::Sql(COVERING_INDEXES),
        disable_foreign_keys: false,
    },
];

const INITIAL_SCHEMA: &str = r#"
CREATE TABLE issues (
    id           TEXT PRIMARY KEY,
    title        TEXT NOT NULL,
    description  TEXT NOT NULL DEFAULT '',
    notes        TEXT NOT NULL DEFAULT '',
    status       TEXT NOT NULL DEFAULT 'open',
    priority     INTEGER NOT NULL DEFAULT 2 CHECK (priority BETWEEN 0 AND 4),
    issue_type   TEXT NOT NULL DEFAULT 'task',
    parent_id    TEXT REFERENCES issues(id) ON DELETE SET NULL,
    assignee     TEXT NOT NULL DEFAULT '',
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    closed_at    TEXT,
    close_reason TEXT NOT NULL DEFAULT ''
);
CREATE INDEX idx_issues_status ON issues(status);
CREATE INDEX idx_issues_parent ON issues(parent_id);

CREATE TABLE dependencies (
    issue_id      TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
    depends_on_id TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
    created_at    TEXT NOT NULL,
    PRIMARY KEY (issue_id, depends_on_id)
);
CREATE INDEX idx_dependencies_depends_on ON dependencies(depends_on_id);

CREATE TABLE labels (
    issue_id TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
    name     TEXT NOT NULL,
    PRIMARY KEY (issue_id, name)
);

CREATE TABLE comments (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id   TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
    author     TEXT NOT NULL,
    text       TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE events (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id   TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
    event_type TEXT NOT NULL,
    actor      TEXT NOT NULL,
    old_value  TEXT,
    new_value  TEXT,
    comment    TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Rebuild of `dependencies` adding the `type` column to the primary key.
/// Uses the create-new / copy / drop / rename pattern.
const TYPED_EDGES_REBUILD: &str = r#"
CREATE TABLE dependencies_new (
    issue_id      TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
    depends_on_id TEXT NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
    type          TEXT NOT NULL DEFAULT 'blocks',
    created_at    TEXT NOT NULL,
    PRIMARY KEY (issue_id, depends_on_id, type)
);
INSERT INTO dependencies_new (issue_id, depends_on_id, type, created_at)
    SELECT issue_id, depends_on_id, 'blocks', created_at FROM dependencies;
DROP TABLE dependencies;
ALTER TABLE dependencies_new RENAME TO dependencies;
CREATE INDEX idx_dependencies_depends_on ON dependencies(depends_on_id);
"#;

const COVERING_INDEXES: &str = r#"
CREATE INDEX idx_issues_status_priority_created ON issues(status, priority, created_at);
CREATE INDEX idx_dependencies_issue_depends ON dependencies(issue_id, depends_on_id);
CREATE INDEX idx_events_issue_created ON events(issue_id, created_at DESC);
CREATE INDEX idx_comments_issue_created ON comments(issue_id, created_at);
"#;

const FULLTEXT_SCHEMA: &str = r#"
CREATE VIRTUAL TABLE issues_fts USING fts5(id UNINDEXED, title, description);
INSERT INTO issues_fts (id, title, description)
    SELECT id, title, description FROM issues;
CREATE TRIGGER issues_fts_insert AFTER INSERT ON issues BEGIN
    INSERT INTO issues_fts (id, title, description)
    VALUES (new.id, new.title, new.description);
END;
CREATE TRIGGER issues_fts_update AFTER UPDATE OF title, description ON issues BEGIN
    DELETE FROM issues_fts WHERE id = new.id;
    INSERT INTO issues_fts (id, title, description)
    VALUES (new.id, new.title, new.description);
END;
CREATE TRIGGER issues_fts_delete AFTER DELETE ON issues BEGIN
    DELETE FROM issues_fts WHERE id = old.id;
END;
"#;

/// Builds the FTS5 index; on builds without FTS5, records the fact in `meta`
/// so text search falls back to an escaped LIKE scan.
fn apply_fulltext_index(conn: &Connection) -> Result<()> {
    match conn.execute_batch(FULLTEXT_SCHEMA) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(error = %e, "FTS5 unavailable, search will use LIKE fallback");
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, '1')",
                [META_FTS_DISABLED],
            )
            .map_err(crate::error::EngineError::from)?;
            Ok(())
        }
    }
}
