//! Local issue store.
//!
//! The sync engine never talks to SQLite directly: it reads and writes the
//! local side only through [`IssueStore`]. [`SqliteStorage`] is the shipped
//! implementation, with:
//! - WAL mode for concurrent reads
//! - IMMEDIATE transactions for atomic writes
//! - Per-service sync extension records stored as JSON objects
//!
//! # Submodules
//!
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - Main SQLite storage implementation

pub mod schema;
pub mod sqlite;

pub use sqlite::{IssueFilter, SqliteStorage};

use crate::error::Result;
use crate::model::LocalIssue;

/// Opaque per-service sync record as stored by the local store.
pub type SyncData = serde_json::Map<String, serde_json::Value>;

/// The local collaborator surface used by the sync engine.
///
/// Implementations must be shareable between concurrent sync workers.
pub trait IssueStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<LocalIssue>>;

    fn all(&self) -> Result<Vec<LocalIssue>>;

    /// Persist a modified issue. Bumps its `updated_at`.
    fn update(&self, issue: &LocalIssue) -> Result<()>;

    fn sync_data(&self, id: &str, service: &str) -> Result<Option<SyncData>>;

    /// Write the sync record for `service`. Must not bump `updated_at`.
    fn set_sync_data(&self, id: &str, service: &str, data: &SyncData) -> Result<()>;

    fn remove_sync_data(&self, id: &str, service: &str) -> Result<()>;
}
