//! Remote issue-tracker surface consumed by the sync engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::sync::diff::{MilestonePatch, UpdatePatch};
use crate::transport::ApiError;

/// Open/closed state of a remote item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    #[default]
    Open,
    Closed,
}

impl RemoteState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// A remote issue as read during one sync pass.
///
/// `id` is the stable internal identifier used by relationship APIs,
/// `number` the user-facing sequence number used by CRUD APIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIssue {
    pub id: u64,
    pub number: u64,
    pub title: String,
    pub body: String,
    pub state: RemoteState,
    pub labels: Vec<String>,
    pub issue_type: Option<String>,
    pub milestone: Option<u64>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMilestone {
    pub number: u64,
    pub title: String,
    pub description: String,
    pub state: RemoteState,
    pub url: String,
}

/// Fields for creating a remote issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<u64>,
}

/// Fields for creating a remote milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMilestone {
    pub title: String,
    pub description: String,
    pub state: RemoteState,
}

/// Operations the sync engine needs from a remote tracker.
///
/// Every call is a single logical request; retries happen inside the
/// transport underneath, so implementations must not retry again.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Login of the authenticated identity.
    async fn current_user(&self) -> Result<String, ApiError>;

    /// Names of all labels in the repository.
    async fn list_labels(&self) -> Result<Vec<String>, ApiError>;

    /// Create a label. An "already exists" response is success.
    async fn create_label(&self, name: &str) -> Result<(), ApiError>;

    async fn get_issue(&self, number: u64) -> Result<RemoteIssue, ApiError>;

    async fn create_issue(&self, fields: &NewIssue) -> Result<RemoteIssue, ApiError>;

    async fn update_issue(&self, number: u64, patch: &UpdatePatch)
    -> Result<RemoteIssue, ApiError>;

    async fn get_milestone(&self, number: u64) -> Result<RemoteMilestone, ApiError>;

    async fn list_milestones(&self) -> Result<Vec<RemoteMilestone>, ApiError>;

    async fn create_milestone(&self, fields: &NewMilestone) -> Result<RemoteMilestone, ApiError>;

    async fn update_milestone(
        &self,
        number: u64,
        patch: &MilestonePatch,
    ) -> Result<RemoteMilestone, ApiError>;

    /// Current parent of issue `number`, if any.
    async fn get_parent(&self, number: u64) -> Result<Option<RemoteIssue>, ApiError>;

    /// Attach `child_id` (internal id) under `parent_number`.
    ///
    /// With `replace_parent`, an existing parent link is replaced in the
    /// same call.
    async fn add_sub_issue(
        &self,
        parent_number: u64,
        child_id: u64,
        replace_parent: bool,
    ) -> Result<(), ApiError>;

    async fn remove_sub_issue(&self, parent_number: u64, child_id: u64) -> Result<(), ApiError>;

    /// Issues currently blocking issue `number`.
    async fn list_blocked_by(&self, number: u64) -> Result<Vec<RemoteIssue>, ApiError>;

    async fn add_blocked_by(&self, number: u64, blocker_id: u64) -> Result<(), ApiError>;

    async fn remove_blocked_by(&self, number: u64, blocker_id: u64) -> Result<(), ApiError>;

    /// Browser URL for issue `number`, without a network call.
    fn issue_url(&self, number: u64) -> String;

    /// Browser URL for milestone `number`, without a network call.
    fn milestone_url(&self, number: u64) -> String;
}
