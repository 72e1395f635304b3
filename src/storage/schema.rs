//! Database schema definitions.
//!
//! Timestamps are stored as INTEGER (Unix milliseconds).

use rusqlite::{Connection, Result};

/// Bumped whenever `SCHEMA_SQL` changes shape.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the local issue store.
pub const SCHEMA_SQL: &str = r"
-- Applied schema versions

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- Local issues, the source of truth for every push

CREATE TABLE IF NOT EXISTS issues (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    body TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'open'
        CHECK (status IN ('backlog', 'open', 'ready', 'in_progress', 'blocked', 'closed', 'deferred')),
    issue_type TEXT NOT NULL DEFAULT 'task'
        CHECK (issue_type IN ('task', 'bug', 'feature', 'epic', 'chore', 'milestone')),
    parent_id TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (parent_id) REFERENCES issues(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status);
CREATE INDEX IF NOT EXISTS idx_issues_parent ON issues(parent_id);

-- Tags: projected to remote labels
CREATE TABLE IF NOT EXISTS issue_tags (
    issue_id TEXT NOT NULL,
    tag TEXT NOT NULL,
    PRIMARY KEY (issue_id, tag),
    FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_issue_tags_tag ON issue_tags(tag);

-- Blocking edges: blocker_id blocks blocked_id
CREATE TABLE IF NOT EXISTS issue_blocks (
    blocker_id TEXT NOT NULL,
    blocked_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (blocker_id, blocked_id),
    CHECK (blocker_id != blocked_id),
    FOREIGN KEY (blocker_id) REFERENCES issues(id) ON DELETE CASCADE,
    FOREIGN KEY (blocked_id) REFERENCES issues(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_issue_blocks_blocked ON issue_blocks(blocked_id);

-- Per-service sync record (JSON object), one row per issue and service.
-- Writing here never touches issues.updated_at.
CREATE TABLE IF NOT EXISTS sync_extensions (
    issue_id TEXT NOT NULL,
    service TEXT NOT NULL,
    data TEXT NOT NULL,
    written_at INTEGER NOT NULL,
    PRIMARY KEY (issue_id, service),
    FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_sync_extensions_service ON sync_extensions(service);
";

/// Configure the connection and create any missing tables.
///
/// Safe to call on every open.
///
/// # Errors
///
/// Fails when a pragma or DDL statement is rejected.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}
