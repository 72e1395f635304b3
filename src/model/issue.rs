//! Local issue model.
//!
//! A `LocalIssue` is the authoritative record held by the local store.
//! The sync engine only reads it; remote state is derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::validate::{STATUSES, TYPES};

/// Workflow status of a local issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Backlog,
    #[default]
    Open,
    Ready,
    InProgress,
    Blocked,
    Closed,
    Deferred,
}

impl IssueStatus {
    /// Canonical storage string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Open => "open",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Closed => "closed",
            Self::Deferred => "deferred",
        }
    }

    /// Whether the issue maps to a closed remote item.
    ///
    /// Every other status projects to an open remote item.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match STATUSES.resolve(s)? {
            "backlog" => Ok(Self::Backlog),
            "open" => Ok(Self::Open),
            "ready" => Ok(Self::Ready),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "closed" => Ok(Self::Closed),
            "deferred" => Ok(Self::Deferred),
            other => Err(Error::InvalidArgument(format!("Invalid status '{other}'"))),
        }
    }
}

/// Classification of a local issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    #[default]
    Task,
    Bug,
    Feature,
    Epic,
    Chore,
    /// Projects to a remote milestone rather than a remote issue.
    Milestone,
}

impl IssueType {
    /// Canonical storage string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Epic => "epic",
            Self::Chore => "chore",
            Self::Milestone => "milestone",
        }
    }

    #[must_use]
    pub const fn is_milestone(&self) -> bool {
        matches!(self, Self::Milestone)
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match TYPES.resolve(s)? {
            "task" => Ok(Self::Task),
            "bug" => Ok(Self::Bug),
            "feature" => Ok(Self::Feature),
            "epic" => Ok(Self::Epic),
            "chore" => Ok(Self::Chore),
            "milestone" => Ok(Self::Milestone),
            other => Err(Error::InvalidArgument(format!("Invalid type '{other}'"))),
        }
    }
}

/// An issue in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIssue {
    /// Stable, externally assigned identifier (e.g. `hs-1a2b3c4d`).
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub status: IssueStatus,
    pub issue_type: IssueType,
    /// Projected to remote labels.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Issues this issue blocks.
    #[serde(default)]
    pub blocking: BTreeSet<String>,
    /// Issues that block this issue.
    #[serde(default)]
    pub blocked_by: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl LocalIssue {
    /// Construct an open task with no relationships.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: String::new(),
            status: IssueStatus::Open,
            issue_type: IssueType::Task,
            tags: BTreeSet::new(),
            parent: None,
            blocking: BTreeSet::new(),
            blocked_by: BTreeSet::new(),
            updated_at: None,
        }
    }

    #[must_use]
    pub fn with_type(mut self, issue_type: IssueType) -> Self {
        self.issue_type = issue_type;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: IssueStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    #[must_use]
    pub fn blocked_by(mut self, blocker: impl Into<String>) -> Self {
        self.blocked_by.insert(blocker.into());
        self
    }

    #[must_use]
    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// True when the issue declares any parent or blocking edge.
    #[must_use]
    pub fn has_relationships(&self) -> bool {
        self.parent.is_some() || !self.blocking.is_empty() || !self.blocked_by.is_empty()
    }
}

/// Generate a fresh local issue ID.
#[must_use]
pub fn generate_issue_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("hs-{}", &uuid[..8])
}
