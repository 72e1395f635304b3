//! SQLite storage implementation.
//!
//! All writes go through [`SqliteStorage::mutate`], which wraps the closure
//! in an IMMEDIATE transaction. The connection sits behind a mutex so the
//! store can be shared with concurrent sync workers.

use crate::error::{Error, Result};
use crate::model::{IssueStatus, IssueType, LocalIssue};
use crate::storage::schema::apply_schema;
use crate::storage::{IssueStore, SyncData};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

const ISSUE_COLUMNS: &str = "id, title, body, status, issue_type, parent_id, updated_at";

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

/// Filters for [`SqliteStorage::list_issues`].
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub status: Option<IssueStatus>,
    pub issue_type: Option<IssueType>,
    /// Include closed issues when no explicit status is requested.
    pub include_closed: bool,
    pub limit: Option<u32>,
}

impl SqliteStorage {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(timeout_ms.map_or(Duration::from_secs(5), Duration::from_millis))?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute a mutation inside an IMMEDIATE transaction.
    ///
    /// The transaction is rolled back if the closure returns an error.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    pub fn mutate<F, R>(&self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> Result<R>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        debug!(op, "committed");
        Ok(result)
    }

    // ==================
    // Issue Operations
    // ==================

    /// Insert a new issue with its tags and edges. Stamps `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced issue is missing or the insert fails.
    pub fn create_issue(&self, issue: &LocalIssue) -> Result<LocalIssue> {
        let now = Utc::now();
        self.mutate("create_issue", |tx| {
            let exists = tx
                .prepare("SELECT 1 FROM issues WHERE id = ?1")?
                .exists([&issue.id])?;
            if exists {
                return Err(Error::InvalidArgument(format!(
                    "Issue {} already exists",
                    issue.id
                )));
            }
            tx.execute(
                "INSERT INTO issues (id, title, body, status, issue_type, parent_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?6)",
                rusqlite::params![
                    issue.id,
                    issue.title,
                    issue.body,
                    issue.status.as_str(),
                    issue.issue_type.as_str(),
                    now.timestamp_millis()
                ],
            )?;
            write_relations(tx, issue, now)?;
            Ok(())
        })?;

        self.get_issue(&issue.id)?.ok_or_else(|| Error::IssueNotFound {
            id: issue.id.clone(),
        })
    }

    /// Get an issue by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_issue(&self, id: &str) -> Result<Option<LocalIssue>> {
        let conn = self.conn();
        let issue = conn
            .query_row(
                &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1"),
                [id],
                map_issue_row,
            )
            .optional()?;

        let Some(mut issue) = issue else {
            return Ok(None);
        };

        let mut stmt = conn.prepare("SELECT tag FROM issue_tags WHERE issue_id = ?1")?;
        issue.tags = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<rusqlite::Result<BTreeSet<String>>>()?;

        let mut stmt = conn.prepare("SELECT blocked_id FROM issue_blocks WHERE blocker_id = ?1")?;
        issue.blocking = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<rusqlite::Result<BTreeSet<String>>>()?;

        let mut stmt = conn.prepare("SELECT blocker_id FROM issue_blocks WHERE blocked_id = ?1")?;
        issue.blocked_by = stmt
            .query_map([id], |row| row.get(0))?
            .collect::<rusqlite::Result<BTreeSet<String>>>()?;

        Ok(Some(issue))
    }

    /// Get an issue, suggesting similar IDs when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IssueNotFound`] or [`Error::IssueNotFoundSimilar`].
    pub fn require_issue(&self, id: &str) -> Result<LocalIssue> {
        if let Some(issue) = self.get_issue(id)? {
            return Ok(issue);
        }
        let similar = crate::validate::find_similar_ids(id, &self.all_issue_ids()?, 3);
        if similar.is_empty() {
            Err(Error::IssueNotFound { id: id.to_string() })
        } else {
            Err(Error::IssueNotFoundSimilar {
                id: id.to_string(),
                similar,
            })
        }
    }

    /// List issues with filters, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<LocalIssue>> {
        let mut sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![];

        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            params.push(Box::new(status.as_str()));
        } else if !filter.include_closed {
            sql.push_str(" AND status != 'closed'");
        }

        if let Some(issue_type) = filter.issue_type {
            sql.push_str(" AND issue_type = ?");
            params.push(Box::new(issue_type.as_str()));
        }

        sql.push_str(" ORDER BY created_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            params.push(Box::new(limit));
        }

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let issues = stmt
            .query_map(params_refs.as_slice(), map_issue_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        attach_relations(&conn, issues)
    }

    /// Every issue in the store, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn all_issues(&self) -> Result<Vec<LocalIssue>> {
        self.list_issues(&IssueFilter {
            include_closed: true,
            ..IssueFilter::default()
        })
    }

    /// All issue IDs (for "did you mean" suggestions).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn all_issue_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM issues ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Replace an issue's fields, tags and edges. Bumps `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IssueNotFound`] for unknown IDs,
    /// [`Error::CycleDetected`] when the new parent is a descendant.
    pub fn update_issue(&self, issue: &LocalIssue) -> Result<LocalIssue> {
        let now = Utc::now();
        self.mutate("update_issue", |tx| {
            let rows = tx.execute(
                "UPDATE issues SET title = ?1, body = ?2, status = ?3, issue_type = ?4, updated_at = ?5
                 WHERE id = ?6",
                rusqlite::params![
                    issue.title,
                    issue.body,
                    issue.status.as_str(),
                    issue.issue_type.as_str(),
                    now.timestamp_millis(),
                    issue.id
                ],
            )?;
            if rows == 0 {
                return Err(Error::IssueNotFound {
                    id: issue.id.clone(),
                });
            }

            tx.execute("DELETE FROM issue_tags WHERE issue_id = ?1", [&issue.id])?;
            tx.execute(
                "DELETE FROM issue_blocks WHERE blocker_id = ?1 OR blocked_id = ?1",
                [&issue.id],
            )?;
            write_relations(tx, issue, now)
        })?;

        self.get_issue(&issue.id)?.ok_or_else(|| Error::IssueNotFound {
            id: issue.id.clone(),
        })
    }

    /// Record that `blocker` blocks `blocked`. Bumps both issues.
    ///
    /// # Errors
    ///
    /// Returns an error if either issue is missing.
    pub fn add_block(&self, blocker: &str, blocked: &str) -> Result<()> {
        if blocker == blocked {
            return Err(Error::InvalidArgument(format!(
                "Issue {blocker} cannot block itself"
            )));
        }
        let now = Utc::now().timestamp_millis();
        self.mutate("add_block", |tx| {
            require_exists(tx, blocker)?;
            require_exists(tx, blocked)?;
            tx.execute(
                "INSERT OR IGNORE INTO issue_blocks (blocker_id, blocked_id, created_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![blocker, blocked, now],
            )?;
            touch(tx, &[blocker, blocked], now)
        })
    }

    /// Remove a blocking edge. Bumps both issues if the edge existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove_block(&self, blocker: &str, blocked: &str) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        self.mutate("remove_block", |tx| {
            let rows = tx.execute(
                "DELETE FROM issue_blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
                [blocker, blocked],
            )?;
            if rows > 0 {
                touch(tx, &[blocker, blocked], now)?;
            }
            Ok(rows > 0)
        })
    }

    // ==================
    // Sync Extensions
    // ==================

    /// Sync record for one issue and service.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the stored JSON is not an object.
    pub fn get_sync_extension(&self, id: &str, service: &str) -> Result<Option<SyncData>> {
        let data: Option<String> = self
            .conn()
            .query_row(
                "SELECT data FROM sync_extensions WHERE issue_id = ?1 AND service = ?2",
                [id, service],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|raw| serde_json::from_str(&raw).map_err(Error::from))
            .transpose()
    }

    /// All sync records for a service, keyed by issue ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn sync_extensions_for(&self, service: &str) -> Result<HashMap<String, SyncData>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT issue_id, data FROM sync_extensions WHERE service = ?1")?;
        let rows = stmt
            .query_map([service], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, raw)| Ok((id, serde_json::from_str(&raw)?)))
            .collect()
    }

    /// Write a sync record. Does not touch the issue's `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IssueNotFound`] if the issue does not exist.
    pub fn set_sync_extension(&self, id: &str, service: &str, data: &SyncData) -> Result<()> {
        let raw = serde_json::to_string(data)?;
        let now = Utc::now().timestamp_millis();
        self.mutate("set_sync_extension", |tx| {
            require_exists(tx, id)?;
            tx.execute(
                "INSERT INTO sync_extensions (issue_id, service, data, written_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(issue_id, service) DO UPDATE SET data = excluded.data, written_at = excluded.written_at",
                rusqlite::params![id, service, raw, now],
            )?;
            Ok(())
        })
    }

    /// Delete a sync record.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn remove_sync_extension(&self, id: &str, service: &str) -> Result<bool> {
        self.mutate("remove_sync_extension", |tx| {
            let rows = tx.execute(
                "DELETE FROM sync_extensions WHERE issue_id = ?1 AND service = ?2",
                [id, service],
            )?;
            Ok(rows > 0)
        })
    }
}

impl IssueStore for SqliteStorage {
    fn get(&self, id: &str) -> Result<Option<LocalIssue>> {
        self.get_issue(id)
    }

    fn all(&self) -> Result<Vec<LocalIssue>> {
        self.all_issues()
    }

    fn update(&self, issue: &LocalIssue) -> Result<()> {
        self.update_issue(issue).map(|_| ())
    }

    fn sync_data(&self, id: &str, service: &str) -> Result<Option<SyncData>> {
        self.get_sync_extension(id, service)
    }

    fn set_sync_data(&self, id: &str, service: &str, data: &SyncData) -> Result<()> {
        self.set_sync_extension(id, service, data)
    }

    fn remove_sync_data(&self, id: &str, service: &str) -> Result<()> {
        self.remove_sync_extension(id, service).map(|_| ())
    }
}

// ==================
// Helpers
// ==================

fn require_exists(tx: &Transaction, id: &str) -> Result<()> {
    let exists = tx.prepare("SELECT 1 FROM issues WHERE id = ?1")?.exists([id])?;
    if exists {
        Ok(())
    } else {
        Err(Error::IssueNotFound { id: id.to_string() })
    }
}

fn touch(tx: &Transaction, ids: &[&str], now: i64) -> Result<()> {
    for id in ids {
        tx.execute(
            "UPDATE issues SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, id],
        )?;
    }
    Ok(())
}

/// Walk up from `parent`; reaching `id` means the link would form a cycle.
fn check_parent_cycle(tx: &Transaction, id: &str, parent: &str) -> Result<()> {
    let mut current = Some(parent.to_string());
    let mut hops = 0_usize;
    while let Some(node) = current {
        if node == id {
            return Err(Error::CycleDetected {
                id: id.to_string(),
                parent: parent.to_string(),
            });
        }
        hops += 1;
        if hops > 10_000 {
            break;
        }
        current = tx
            .query_row("SELECT parent_id FROM issues WHERE id = ?1", [&node], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?
            .flatten();
    }
    Ok(())
}

fn write_relations(tx: &Transaction, issue: &LocalIssue, now: DateTime<Utc>) -> Result<()> {
    let now_ms = now.timestamp_millis();

    if let Some(parent) = &issue.parent {
        require_exists(tx, parent)?;
        check_parent_cycle(tx, &issue.id, parent)?;
    }
    tx.execute(
        "UPDATE issues SET parent_id = ?1 WHERE id = ?2",
        rusqlite::params![issue.parent, issue.id],
    )?;

    for tag in &issue.tags {
        tx.execute(
            "INSERT OR IGNORE INTO issue_tags (issue_id, tag) VALUES (?1, ?2)",
            [&issue.id, tag],
        )?;
    }

    let edges = issue
        .blocking
        .iter()
        .map(|other| (issue.id.as_str(), other.as_str()))
        .chain(
            issue
                .blocked_by
                .iter()
                .map(|other| (other.as_str(), issue.id.as_str())),
        );
    for (blocker, blocked) in edges {
        let other = if blocker == issue.id { blocked } else { blocker };
        require_exists(tx, other)?;
        tx.execute(
            "INSERT OR IGNORE INTO issue_blocks (blocker_id, blocked_id, created_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![blocker, blocked, now_ms],
        )?;
    }
    Ok(())
}

fn attach_relations(conn: &Connection, mut issues: Vec<LocalIssue>) -> Result<Vec<LocalIssue>> {
    let mut tags: HashMap<String, BTreeSet<String>> = HashMap::new();
    let mut stmt = conn.prepare("SELECT issue_id, tag FROM issue_tags")?;
    for row in stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get(1)?)))? {
        let (id, tag) = row?;
        tags.entry(id).or_default().insert(tag);
    }

    let mut blocking: HashMap<String, BTreeSet<String>> = HashMap::new();
    let mut blocked_by: HashMap<String, BTreeSet<String>> = HashMap::new();
    let mut stmt = conn.prepare("SELECT blocker_id, blocked_id FROM issue_blocks")?;
    for row in stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })? {
        let (blocker, blocked) = row?;
        blocking
            .entry(blocker.clone())
            .or_default()
            .insert(blocked.clone());
        blocked_by.entry(blocked).or_default().insert(blocker);
    }

    for issue in &mut issues {
        issue.tags = tags.remove(&issue.id).unwrap_or_default();
        issue.blocking = blocking.remove(&issue.id).unwrap_or_default();
        issue.blocked_by = blocked_by.remove(&issue.id).unwrap_or_default();
    }
    Ok(issues)
}

fn conversion_error(idx: usize, err: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn map_issue_row(row: &rusqlite::Row) -> rusqlite::Result<LocalIssue> {
    let status: String = row.get(3)?;
    let issue_type: String = row.get(4)?;
    let updated_at: i64 = row.get(6)?;

    Ok(LocalIssue {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        status: status.parse().map_err(|e| conversion_error(3, e))?,
        issue_type: issue_type.parse().map_err(|e| conversion_error(4, e))?,
        tags: BTreeSet::new(),
        parent: row.get(5)?,
        blocking: BTreeSet::new(),
        blocked_by: BTreeSet::new(),
        updated_at: DateTime::from_timestamp_millis(updated_at),
    })
}
