//! Sync run inputs and outputs.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// What happened to one local issue during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
    Unchanged,
    Skipped,
    WouldCreate,
    WouldUpdate,
    Error,
}

impl SyncAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Skipped => "skipped",
            Self::WouldCreate => "would_create",
            Self::WouldUpdate => "would_update",
            Self::Error => "error",
        }
    }

    pub const ALL: [Self; 7] = [
        Self::Created,
        Self::Updated,
        Self::Unchanged,
        Self::Skipped,
        Self::WouldCreate,
        Self::WouldUpdate,
        Self::Error,
    ];
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome for one local issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub id: String,
    pub action: SyncAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    /// Opaque remote key for services without numeric identifiers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResult {
    #[must_use]
    pub fn new(id: impl Into<String>, action: SyncAction) -> Self {
        Self {
            id: id.into(),
            action,
            number: None,
            key: None,
            url: None,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(id: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(id, SyncAction::Error)
        }
    }

    #[must_use]
    pub fn with_number(mut self, number: u64) -> Self {
        self.number = Some(number);
        self
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Progress notification, delivered with monotonically increasing `completed`.
#[derive(Debug, Clone)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub id: String,
    pub action: SyncAction,
}

pub type ProgressFn = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Per-run switches.
#[derive(Clone, Default)]
pub struct SyncOptions {
    /// Report what would change without mutating anything.
    pub dry_run: bool,
    /// Ignore the last-synced timestamp.
    pub force: bool,
    /// Skip parent links and blocking edges.
    pub disable_relationships: bool,
    pub progress: Option<ProgressFn>,
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("dry_run", &self.dry_run)
            .field("force", &self.force)
            .field("disable_relationships", &self.disable_relationships)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Results of one run, in input order, plus degraded-path warnings.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub results: Vec<SyncResult>,
    pub warnings: Vec<String>,
}

impl SyncReport {
    #[must_use]
    pub fn count(&self, action: SyncAction) -> usize {
        self.results.iter().filter(|r| r.action == action).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(SyncAction::Error)
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// Non-zero counts per action, for summaries.
    #[must_use]
    pub fn counts(&self) -> Vec<(SyncAction, usize)> {
        SyncAction::ALL
            .iter()
            .map(|action| (*action, self.count(*action)))
            .filter(|(_, n)| *n > 0)
            .collect()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SyncResult> {
        self.results.iter().find(|r| r.id == id)
    }
}

/// Per-run cache filled once at warm-up and read thereafter.
#[derive(Debug, Clone, Default)]
pub struct RunCache {
    /// Authenticated login, when the identity fetch succeeded.
    pub user: Option<String>,
    /// Known label names, lowercased.
    labels: HashSet<String>,
}

impl RunCache {
    pub fn add_label(&mut self, name: &str) {
        self.labels.insert(name.to_lowercase());
    }

    #[must_use]
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.contains(&name.to_lowercase())
    }
}
