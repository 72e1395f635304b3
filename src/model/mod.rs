//! Data models for hubsync.
//!
//! This module contains the local-side domain models:
//! - LocalIssue (the record being projected to a remote tracker)
//! - IssueStatus / IssueType

pub mod issue;

pub use issue::{generate_issue_id, IssueStatus, IssueType, LocalIssue};
