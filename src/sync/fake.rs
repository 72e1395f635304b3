//! In-memory tracker that records every call, for engine tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::sync::diff::{MilestonePatch, UpdatePatch};
use crate::sync::tracker::{
    IssueTracker, NewIssue, NewMilestone, RemoteIssue, RemoteMilestone, RemoteState,
};
use crate::transport::ApiError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CurrentUser,
    ListLabels,
    CreateLabel(String),
    GetIssue(u64),
    CreateIssue(String),
    UpdateIssue(u64, UpdatePatch),
    GetMilestone(u64),
    ListMilestones,
    CreateMilestone(String),
    UpdateMilestone(u64, MilestonePatch),
    GetParent(u64),
    AddSubIssue {
        parent: u64,
        child_id: u64,
        replace_parent: bool,
    },
    RemoveSubIssue {
        parent: u64,
        child_id: u64,
    },
    ListBlockedBy(u64),
    AddBlockedBy {
        number: u64,
        blocker_id: u64,
    },
    RemoveBlockedBy {
        number: u64,
        blocker_id: u64,
    },
}

impl Call {
    const fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateLabel(_)
                | Self::CreateIssue(_)
                | Self::UpdateIssue(..)
                | Self::CreateMilestone(_)
                | Self::UpdateMilestone(..)
                | Self::AddSubIssue { .. }
                | Self::RemoveSubIssue { .. }
                | Self::AddBlockedBy { .. }
                | Self::RemoveBlockedBy { .. }
        )
    }
}

#[derive(Default)]
struct World {
    next_number: u64,
    issues: BTreeMap<u64, RemoteIssue>,
    milestones: BTreeMap<u64, RemoteMilestone>,
    parents: HashMap<u64, u64>,
    blocked_by: HashMap<u64, BTreeSet<u64>>,
    labels: BTreeSet<String>,
    failing_reads: HashSet<u64>,
    failing_titles: HashSet<String>,
    calls: Vec<Call>,
}

pub struct FakeTracker {
    world: Mutex<World>,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self {
            world: Mutex::new(World {
                next_number: 1,
                ..World::default()
            }),
        }
    }

    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap()
    }

    pub const fn internal_id(number: u64) -> u64 {
        number + 10_000
    }

    fn number_of(id: u64) -> u64 {
        id - 10_000
    }

    fn url(number: u64) -> String {
        format!("https://tracker.test/issues/{number}")
    }

    pub fn seed_issue(&self, number: u64, title: &str) -> RemoteIssue {
        let issue = RemoteIssue {
            id: Self::internal_id(number),
            number,
            title: title.to_string(),
            body: String::new(),
            state: RemoteState::Open,
            labels: Vec::new(),
            issue_type: None,
            milestone: None,
            url: Self::url(number),
        };
        let mut world = self.world();
        world.issues.insert(number, issue.clone());
        world.next_number = world.next_number.max(number + 1);
        issue
    }

    pub fn seed_parent(&self, child: u64, parent: u64) {
        self.world().parents.insert(child, parent);
    }

    pub fn seed_blocked_by(&self, number: u64, blocker_number: u64) {
        self.world()
            .blocked_by
            .entry(number)
            .or_default()
            .insert(Self::internal_id(blocker_number));
    }

    pub fn seed_label(&self, name: &str) {
        self.world().labels.insert(name.to_string());
    }

    pub fn delete_issue(&self, number: u64) {
        self.world().issues.remove(&number);
    }

    pub fn fail_reads_of(&self, number: u64) {
        self.world().failing_reads.insert(number);
    }

    pub fn fail_creates_titled(&self, title: &str) {
        self.world().failing_titles.insert(title.to_string());
    }

    pub fn issue(&self, number: u64) -> Option<RemoteIssue> {
        self.world().issues.get(&number).cloned()
    }

    pub fn issue_titled(&self, title: &str) -> Option<RemoteIssue> {
        self.world()
            .issues
            .values()
            .find(|i| i.title == title)
            .cloned()
    }

    pub fn parent_of(&self, number: u64) -> Option<u64> {
        self.world().parents.get(&number).copied()
    }

    pub fn blockers_of(&self, number: u64) -> BTreeSet<u64> {
        self.world()
            .blocked_by
            .get(&number)
            .map(|ids| ids.iter().map(|id| Self::number_of(*id)).collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.world().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.world()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.world().calls.clear();
    }

    fn record(&self, call: Call) -> MutexGuard<'_, World> {
        let mut world = self.world();
        world.calls.push(call);
        world
    }
}

fn not_found(what: &str, number: u64) -> ApiError {
    ApiError::NotFound {
        url: format!("https://tracker.test/{what}/{number}"),
    }
}

fn unavailable() -> ApiError {
    ApiError::Api {
        status: 500,
        message: "unavailable".into(),
    }
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn current_user(&self) -> Result<String, ApiError> {
        self.record(Call::CurrentUser);
        Ok("octocat".into())
    }

    async fn list_labels(&self) -> Result<Vec<String>, ApiError> {
        let world = self.record(Call::ListLabels);
        Ok(world.labels.iter().cloned().collect())
    }

    async fn create_label(&self, name: &str) -> Result<(), ApiError> {
        let mut world = self.record(Call::CreateLabel(name.to_string()));
        world.labels.insert(name.to_string());
        Ok(())
    }

    async fn get_issue(&self, number: u64) -> Result<RemoteIssue, ApiError> {
        let world = self.record(Call::GetIssue(number));
        if world.failing_reads.contains(&number) {
            return Err(unavailable());
        }
        world
            .issues
            .get(&number)
            .cloned()
            .ok_or_else(|| not_found("issues", number))
    }

    async fn create_issue(&self, fields: &NewIssue) -> Result<RemoteIssue, ApiError> {
        let mut world = self.record(Call::CreateIssue(fields.title.clone()));
        if world.failing_titles.contains(&fields.title) {
            return Err(ApiError::Api {
                status: 422,
                message: "Validation Failed".into(),
            });
        }
        let number = world.next_number;
        world.next_number += 1;
        let issue = RemoteIssue {
            id: Self::internal_id(number),
            number,
            title: fields.title.clone(),
            body: fields.body.clone(),
            state: RemoteState::Open,
            labels: fields.labels.clone(),
            issue_type: fields.issue_type.clone(),
            milestone: fields.milestone,
            url: Self::url(number),
        };
        world.issues.insert(number, issue.clone());
        Ok(issue)
    }

    async fn update_issue(
        &self,
        number: u64,
        patch: &UpdatePatch,
    ) -> Result<RemoteIssue, ApiError> {
        let mut world = self.record(Call::UpdateIssue(number, patch.clone()));
        let issue = world
            .issues
            .get_mut(&number)
            .ok_or_else(|| not_found("issues", number))?;
        if let Some(title) = &patch.title {
            issue.title.clone_from(title);
        }
        if let Some(body) = &patch.body {
            issue.body.clone_from(body);
        }
        if let Some(state) = patch.state {
            issue.state = state;
        }
        if let Some(labels) = &patch.labels {
            issue.labels.clone_from(labels);
        }
        if let Some(issue_type) = &patch.issue_type {
            issue.issue_type = Some(issue_type.clone());
        }
        if let Some(milestone) = patch.milestone {
            issue.milestone = milestone;
        }
        Ok(issue.clone())
    }

    async fn get_milestone(&self, number: u64) -> Result<RemoteMilestone, ApiError> {
        let world = self.record(Call::GetMilestone(number));
        world
            .milestones
            .get(&number)
            .cloned()
            .ok_or_else(|| not_found("milestones", number))
    }

    async fn list_milestones(&self) -> Result<Vec<RemoteMilestone>, ApiError> {
        let world = self.record(Call::ListMilestones);
        Ok(world.milestones.values().cloned().collect())
    }

    async fn create_milestone(&self, fields: &NewMilestone) -> Result<RemoteMilestone, ApiError> {
        let mut world = self.record(Call::CreateMilestone(fields.title.clone()));
        if world.milestones.values().any(|m| m.title == fields.title) {
            return Err(ApiError::Api {
                status: 422,
                message: "already_exists".into(),
            });
        }
        let number = world.milestones.len() as u64 + 1;
        let milestone = RemoteMilestone {
            number,
            title: fields.title.clone(),
            description: fields.description.clone(),
            state: fields.state,
            url: format!("https://tracker.test/milestone/{number}"),
        };
        world.milestones.insert(number, milestone.clone());
        Ok(milestone)
    }

    async fn update_milestone(
        &self,
        number: u64,
        patch: &MilestonePatch,
    ) -> Result<RemoteMilestone, ApiError> {
        let mut world = self.record(Call::UpdateMilestone(number, patch.clone()));
        let milestone = world
            .milestones
            .get_mut(&number)
            .ok_or_else(|| not_found("milestones", number))?;
        if let Some(title) = &patch.title {
            milestone.title.clone_from(title);
        }
        if let Some(description) = &patch.description {
            milestone.description.clone_from(description);
        }
        if let Some(state) = patch.state {
            milestone.state = state;
        }
        Ok(milestone.clone())
    }

    async fn get_parent(&self, number: u64) -> Result<Option<RemoteIssue>, ApiError> {
        let world = self.record(Call::GetParent(number));
        if world.failing_reads.contains(&number) {
            return Err(unavailable());
        }
        Ok(world
            .parents
            .get(&number)
            .and_then(|parent| world.issues.get(parent))
            .cloned())
    }

    async fn add_sub_issue(
        &self,
        parent_number: u64,
        child_id: u64,
        replace_parent: bool,
    ) -> Result<(), ApiError> {
        let mut world = self.record(Call::AddSubIssue {
            parent: parent_number,
            child_id,
            replace_parent,
        });
        let child = Self::number_of(child_id);
        if world.parents.contains_key(&child) && !replace_parent {
            return Err(ApiError::Api {
                status: 422,
                message: "issue already has a parent".into(),
            });
        }
        world.parents.insert(child, parent_number);
        Ok(())
    }

    async fn remove_sub_issue(&self, parent_number: u64, child_id: u64) -> Result<(), ApiError> {
        let mut world = self.record(Call::RemoveSubIssue {
            parent: parent_number,
            child_id,
        });
        world.parents.remove(&Self::number_of(child_id));
        Ok(())
    }

    async fn list_blocked_by(&self, number: u64) -> Result<Vec<RemoteIssue>, ApiError> {
        let world = self.record(Call::ListBlockedBy(number));
        if world.failing_reads.contains(&number) {
            return Err(unavailable());
        }
        Ok(world
            .blocked_by
            .get(&number)
            .into_iter()
            .flatten()
            .filter_map(|id| world.issues.get(&Self::number_of(*id)))
            .cloned()
            .collect())
    }

    async fn add_blocked_by(&self, number: u64, blocker_id: u64) -> Result<(), ApiError> {
        let mut world = self.record(Call::AddBlockedBy { number, blocker_id });
        world.blocked_by.entry(number).or_default().insert(blocker_id);
        Ok(())
    }

    async fn remove_blocked_by(&self, number: u64, blocker_id: u64) -> Result<(), ApiError> {
        let mut world = self.record(Call::RemoveBlockedBy { number, blocker_id });
        if let Some(ids) = world.blocked_by.get_mut(&number) {
            ids.remove(&blocker_id);
        }
        Ok(())
    }

    fn issue_url(&self, number: u64) -> String {
        Self::url(number)
    }

    fn milestone_url(&self, number: u64) -> String {
        format!("https://tracker.test/milestone/{number}")
    }
}
