//! One-way push sync from the local store to a remote tracker.
//!
//! The local store is authoritative: a run only ever writes to the remote,
//! and reads from it just enough to compute minimal patches.
//!
//! # Architecture
//!
//! - [`tracker`]: the remote surface ([`IssueTracker`]) each service implements
//! - [`state`]: per-service sync records, buffered and flushed once per run
//! - [`diff`]: minimal update patches from local and remote state
//! - [`relations`]: parent link and blocked-by edge convergence
//! - [`engine`]: the multi-pass [`Syncer`] tying it together
//!
//! # Example
//!
//! ```ignore
//! use hubsync::sync::{Syncer, SyncerSettings, SyncOptions};
//!
//! let syncer = Syncer::new(tracker, store.clone(), "github", SyncerSettings::default());
//! let report = syncer.sync(&store.all()?, &SyncOptions::default()).await?;
//! for result in &report.results {
//!     println!("{} {}", result.id, result.action);
//! }
//! ```

pub mod diff;
pub mod engine;
pub mod relations;
pub mod state;
pub mod tracker;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use diff::{MilestonePatch, UpdatePatch};
pub use engine::{remote_type_name, Syncer, SyncerSettings};
pub use state::{is_stale, SyncRecord, SyncStateStore};
pub use tracker::{IssueTracker, NewIssue, NewMilestone, RemoteIssue, RemoteMilestone, RemoteState};
pub use types::{Progress, ProgressFn, SyncAction, SyncOptions, SyncReport, SyncResult};
