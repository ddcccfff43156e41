//! SQL migration definitions for the LeadScout database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as one batch.

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
        description: "Initial schema: sheet_rows, runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Local lead table: one row per physical sheet row (1-based, row 1 is the header)
CREATE TABLE IF NOT EXISTS sheet_rows (
    sheet      TEXT NOT NULL,
    row_index  INTEGER NOT NULL,
    cells_json TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (sheet, row_index)
);

-- Run history
CREATE TABLE IF NOT EXISTS runs (
    id           TEXT PRIMARY KEY,
    regions_json TEXT NOT NULL,
    suffix       TEXT NOT NULL,
    dry_run      INTEGER NOT NULL DEFAULT 0,
    started_at   TEXT NOT NULL,
    finished_at  TEXT,
    status       TEXT NOT NULL,
    totals_json  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
