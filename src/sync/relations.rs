//! Relationship reconciliation.
//!
//! Converges the remote parent link and blocked-by edges of one issue to
//! the locally declared graph. Every call here is best-effort: the
//! transport has already retried, so failures become warnings and are
//! picked up again on the issue's next sync.

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

use crate::model::LocalIssue;
use crate::storage::IssueStore;
use crate::sync::state::SyncStateStore;
use crate::sync::tracker::IssueTracker;

/// Desired blocking edges of one issue within a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgePlan {
    /// Own `blocked_by` plus every in-run issue listing this one in `blocking`.
    pub blocked_by: BTreeSet<String>,
    /// `blocking` targets outside the run. Their edge is added on the
    /// target's blocked-by list, never removed.
    pub blocking_outside: BTreeSet<String>,
}

/// Build the edge plan for every issue of a run.
#[must_use]
pub fn plan_edges(issues: &[LocalIssue]) -> HashMap<String, EdgePlan> {
    let in_run: HashSet<&str> = issues.iter().map(|i| i.id.as_str()).collect();
    let mut plans: HashMap<String, EdgePlan> = issues
        .iter()
        .map(|issue| {
            let plan = EdgePlan {
                blocked_by: issue.blocked_by.clone(),
                blocking_outside: issue
                    .blocking
                    .iter()
                    .filter(|target| !in_run.contains(target.as_str()))
                    .cloned()
                    .collect(),
            };
            (issue.id.clone(), plan)
        })
        .collect();

    for issue in issues {
        for target in &issue.blocking {
            if let Some(plan) = plans.get_mut(target) {
                plan.blocked_by.insert(issue.id.clone());
            }
        }
    }
    plans
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RemoteRef {
    number: u64,
    id: u64,
}

enum Resolve {
    Found(RemoteRef),
    NotSynced,
    Failed(String),
}

/// Reconciles one issue at a time against the remote graph.
pub struct Reconciler<'a> {
    tracker: &'a dyn IssueTracker,
    state: &'a SyncStateStore,
    store: &'a dyn IssueStore,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub fn new(
        tracker: &'a dyn IssueTracker,
        state: &'a SyncStateStore,
        store: &'a dyn IssueStore,
    ) -> Self {
        Self {
            tracker,
            state,
            store,
        }
    }

    /// Converge parent link and blocking edges of `issue`.
    ///
    /// Returns warnings for every edge that could not be read or written.
    pub async fn reconcile(&self, issue: &LocalIssue, plan: &EdgePlan) -> Vec<String> {
        let mut warnings = Vec::new();

        let me = match self.resolve(&issue.id).await {
            Resolve::Found(me) => me,
            Resolve::NotSynced => {
                debug!(id = %issue.id, "not synced, skipping relationships");
                return warnings;
            }
            Resolve::Failed(err) => {
                note(&mut warnings, format!("{}: could not resolve remote issue: {err}", issue.id));
                return warnings;
            }
        };

        self.reconcile_parent(issue, me, &mut warnings).await;
        self.reconcile_blocked_by(issue, me, &plan.blocked_by, &mut warnings)
            .await;
        for target in &plan.blocking_outside {
            self.add_blocking_edge(issue, me, target, &mut warnings)
                .await;
        }
        warnings
    }

    async fn resolve(&self, id: &str) -> Resolve {
        let record = match self.state.get(id) {
            Ok(record) => record,
            Err(err) => return Resolve::Failed(err.to_string()),
        };
        let Some(number) = record.number else {
            return Resolve::NotSynced;
        };
        if let Some(remote_id) = record.remote_id {
            return Resolve::Found(RemoteRef {
                number,
                id: remote_id,
            });
        }
        match self.tracker.get_issue(number).await {
            Ok(remote) => {
                if let Err(err) = self.state.set(id, number, Some(remote.id)) {
                    debug!(id, error = %err, "could not cache remote id");
                }
                Resolve::Found(RemoteRef {
                    number,
                    id: remote.id,
                })
            }
            Err(err) => Resolve::Failed(err.to_string()),
        }
    }

    /// A milestone parent is carried by milestone assignment, so the
    /// desired sub-issue link is then none and any existing one is removed.
    async fn reconcile_parent(&self, issue: &LocalIssue, me: RemoteRef, warnings: &mut Vec<String>) {
        let desired = match &issue.parent {
            None => None,
            Some(parent_id) => match self.store.get(parent_id) {
                Ok(Some(parent)) if parent.issue_type.is_milestone() => None,
                Ok(_) => match self.resolve(parent_id).await {
                    Resolve::Found(parent) => Some(parent),
                    Resolve::NotSynced => {
                        note(warnings, format!("{}: parent {parent_id} is not synced", issue.id));
                        return;
                    }
                    Resolve::Failed(err) => {
                        note(warnings, format!("{}: could not resolve parent {parent_id}: {err}", issue.id));
                        return;
                    }
                },
                Err(err) => {
                    note(warnings, format!("{}: could not read parent {parent_id}: {err}", issue.id));
                    return;
                }
            },
        };

        let current = match self.tracker.get_parent(me.number).await {
            Ok(current) => current.map(|p| p.number),
            Err(err) => {
                note(warnings, format!("{}: could not fetch remote parent: {err}", issue.id));
                return;
            }
        };

        let outcome = match (current, desired) {
            (Some(current), Some(wanted)) if current == wanted.number => return,
            (_, Some(wanted)) => {
                debug!(id = %issue.id, parent = wanted.number, "linking parent");
                self.tracker
                    .add_sub_issue(wanted.number, me.id, true)
                    .await
            }
            (Some(current), None) => {
                debug!(id = %issue.id, parent = current, "unlinking parent");
                self.tracker.remove_sub_issue(current, me.id).await
            }
            (None, None) => return,
        };
        if let Err(err) = outcome {
            note(warnings, format!("{}: parent link failed: {err}", issue.id));
        }
    }

    async fn reconcile_blocked_by(
        &self,
        issue: &LocalIssue,
        me: RemoteRef,
        blockers: &BTreeSet<String>,
        warnings: &mut Vec<String>,
    ) {
        let mut desired = BTreeSet::new();
        let mut complete = true;
        for blocker in blockers {
            match self.resolve(blocker).await {
                Resolve::Found(remote) => {
                    desired.insert(remote.id);
                }
                Resolve::NotSynced => {
                    note(warnings, format!("{}: blocker {blocker} is not synced", issue.id));
                }
                Resolve::Failed(err) => {
                    complete = false;
                    note(warnings, format!("{}: could not resolve blocker {blocker}: {err}", issue.id));
                }
            }
        }

        let current: BTreeSet<u64> = match self.tracker.list_blocked_by(me.number).await {
            Ok(current) => current.into_iter().map(|i| i.id).collect(),
            Err(err) => {
                note(warnings, format!("{}: could not fetch blocked-by edges: {err}", issue.id));
                return;
            }
        };

        for add in desired.difference(&current) {
            if let Err(err) = self.tracker.add_blocked_by(me.number, *add).await {
                note(warnings, format!("{}: adding blocked-by edge failed: {err}", issue.id));
            }
        }

        // An unresolved blocker may be one of the current edges.
        if !complete {
            return;
        }
        for stale in current.difference(&desired) {
            if let Err(err) = self.tracker.remove_blocked_by(me.number, *stale).await {
                note(warnings, format!("{}: removing blocked-by edge failed: {err}", issue.id));
            }
        }
    }

    async fn add_blocking_edge(
        &self,
        issue: &LocalIssue,
        me: RemoteRef,
        target: &str,
        warnings: &mut Vec<String>,
    ) {
        let target_ref = match self.resolve(target).await {
            Resolve::Found(target_ref) => target_ref,
            Resolve::NotSynced => {
                note(warnings, format!("{}: blocked issue {target} is not synced", issue.id));
                return;
            }
            Resolve::Failed(err) => {
                note(warnings, format!("{}: could not resolve blocked issue {target}: {err}", issue.id));
                return;
            }
        };

        match self.tracker.list_blocked_by(target_ref.number).await {
            Ok(existing) if existing.iter().any(|i| i.id == me.id) => {}
            Ok(_) => {
                if let Err(err) = self.tracker.add_blocked_by(target_ref.number, me.id).await {
                    note(warnings, format!("{}: blocking edge to {target} failed: {err}", issue.id));
                }
            }
            Err(err) => {
                note(warnings, format!("{}: could not fetch blocked-by edges of {target}: {err}", issue.id));
            }
        }
    }
}

fn note(warnings: &mut Vec<String>, message: String) {
    warn!("{message}");
    warnings.push(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IssueType;
    use crate::storage::SqliteStorage;
    use crate::sync::fake::{Call, FakeTracker};
    use std::sync::Arc;

    struct Fixture {
        storage: Arc<SqliteStorage>,
        state: SyncStateStore,
        tracker: FakeTracker,
    }

    impl Fixture {
        fn new(issues: &[LocalIssue]) -> Self {
            let storage = Arc::new(SqliteStorage::open_memory().unwrap());
            for issue in issues {
                storage.create_issue(issue).unwrap();
            }
            let state = SyncStateStore::new(storage.clone(), "github");
            Self {
                storage,
                state,
                tracker: FakeTracker::new(),
            }
        }

        /// Seed a remote issue and record it as synced.
        fn synced(&self, id: &str, number: u64) {
            let remote = self.tracker.seed_issue(number, id);
            self.state.set(id, number, Some(remote.id)).unwrap();
        }

        async fn reconcile(&self, id: &str, plan: &EdgePlan) -> Vec<String> {
            let issue = self.storage.get_issue(id).unwrap().unwrap();
            Reconciler::new(&self.tracker, &self.state, self.storage.as_ref())
                .reconcile(&issue, plan)
                .await
        }
    }

    #[test]
    fn test_plan_unions_blocking_into_blocked_by() {
        let mut a = LocalIssue::new("a", "A");
        a.blocking.insert("b".into());
        a.blocking.insert("outside".into());
        let b = LocalIssue::new("b", "B").blocked_by("c");
        let c = LocalIssue::new("c", "C");

        let plans = plan_edges(&[a, b, c]);
        let b_plan = &plans["b"];
        assert_eq!(
            b_plan.blocked_by,
            ["a", "c"]
                .iter()
                .map(ToString::to_string)
                .collect::<BTreeSet<String>>()
        );
        assert_eq!(
            plans["a"].blocking_outside,
            ["outside".to_string()].into_iter().collect::<BTreeSet<_>>()
        );
    }

    #[tokio::test]
    async fn test_blocked_by_converges_with_one_add_and_one_remove() {
        let fixture = Fixture::new(&[
            LocalIssue::new("a", "A"),
            LocalIssue::new("b", "B"),
            LocalIssue::new("t", "T"),
        ]);
        fixture.synced("a", 1);
        fixture.synced("b", 2);
        fixture.synced("t", 3);
        fixture.tracker.seed_blocked_by(3, 1);
        fixture.tracker.clear_calls();

        let plan = EdgePlan {
            blocked_by: ["b".to_string()].into_iter().collect(),
            ..EdgePlan::default()
        };
        let warnings = fixture.reconcile("t", &plan).await;
        assert!(warnings.is_empty(), "{warnings:?}");

        let b_id = FakeTracker::internal_id(2);
        let a_id = FakeTracker::internal_id(1);
        let mutations = fixture.tracker.mutating_calls();
        assert_eq!(
            mutations,
            vec![
                Call::AddBlockedBy {
                    number: 3,
                    blocker_id: b_id
                },
                Call::RemoveBlockedBy {
                    number: 3,
                    blocker_id: a_id
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_reparent_replaces_without_touching_old_parent() {
        let fixture = Fixture::new(&[
            LocalIssue::new("p1", "P1"),
            LocalIssue::new("p2", "P2"),
            LocalIssue::new("c", "C").with_parent("p2"),
        ]);
        fixture.synced("p1", 1);
        fixture.synced("p2", 2);
        fixture.synced("c", 3);
        fixture.tracker.seed_parent(3, 1);
        fixture.tracker.clear_calls();

        let warnings = fixture.reconcile("c", &EdgePlan::default()).await;
        assert!(warnings.is_empty(), "{warnings:?}");

        assert_eq!(
            fixture.tracker.mutating_calls(),
            vec![Call::AddSubIssue {
                parent: 2,
                child_id: FakeTracker::internal_id(3),
                replace_parent: true
            }]
        );
        assert_eq!(fixture.tracker.parent_of(3), Some(2));
    }

    #[tokio::test]
    async fn test_removed_parent_is_unlinked() {
        let fixture = Fixture::new(&[LocalIssue::new("p", "P"), LocalIssue::new("c", "C")]);
        fixture.synced("p", 1);
        fixture.synced("c", 2);
        fixture.tracker.seed_parent(2, 1);
        fixture.tracker.clear_calls();

        fixture.reconcile("c", &EdgePlan::default()).await;
        assert_eq!(
            fixture.tracker.mutating_calls(),
            vec![Call::RemoveSubIssue {
                parent: 1,
                child_id: FakeTracker::internal_id(2)
            }]
        );
    }

    #[tokio::test]
    async fn test_milestone_parent_is_not_linked() {
        let fixture = Fixture::new(&[
            LocalIssue::new("m", "v1").with_type(IssueType::Milestone),
            LocalIssue::new("c", "C").with_parent("m"),
        ]);
        fixture.state.set_milestone("m", 1).unwrap();
        fixture.synced("c", 2);
        fixture.tracker.clear_calls();

        let warnings = fixture.reconcile("c", &EdgePlan::default()).await;
        assert!(warnings.is_empty());
        assert!(fixture.tracker.mutating_calls().is_empty());
        assert_eq!(fixture.tracker.parent_of(2), None);
    }

    #[tokio::test]
    async fn test_moving_under_milestone_drops_old_link() {
        let fixture = Fixture::new(&[
            LocalIssue::new("p", "P"),
            LocalIssue::new("m", "v1").with_type(IssueType::Milestone),
            LocalIssue::new("c", "C").with_parent("m"),
        ]);
        fixture.synced("p", 1);
        fixture.state.set_milestone("m", 1).unwrap();
        fixture.synced("c", 2);
        fixture.tracker.seed_parent(2, 1);
        fixture.tracker.clear_calls();

        let warnings = fixture.reconcile("c", &EdgePlan::default()).await;
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(
            fixture.tracker.mutating_calls(),
            vec![Call::RemoveSubIssue {
                parent: 1,
                child_id: FakeTracker::internal_id(2)
            }]
        );
        assert_eq!(fixture.tracker.parent_of(2), None);
    }

    #[tokio::test]
    async fn test_blocking_outside_run_is_deduplicated() {
        let fixture = Fixture::new(&[LocalIssue::new("a", "A"), LocalIssue::new("x", "X")]);
        fixture.synced("a", 1);
        fixture.synced("x", 2);
        fixture.tracker.seed_blocked_by(2, 1);
        fixture.tracker.clear_calls();

        let plan = EdgePlan {
            blocking_outside: ["x".to_string()].into_iter().collect(),
            ..EdgePlan::default()
        };
        fixture.reconcile("a", &plan).await;
        assert!(
            !fixture
                .tracker
                .mutating_calls()
                .iter()
                .any(|c| matches!(c, Call::AddBlockedBy { number: 2, .. }))
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_becomes_warning() {
        let fixture = Fixture::new(&[LocalIssue::new("a", "A"), LocalIssue::new("b", "B")]);
        fixture.synced("a", 1);
        fixture.synced("b", 2);
        fixture.tracker.fail_reads_of(1);

        let plan = EdgePlan {
            blocked_by: ["b".to_string()].into_iter().collect(),
            ..EdgePlan::default()
        };
        let warnings = fixture.reconcile("a", &plan).await;
        assert!(warnings.iter().any(|w| w.contains("blocked-by")));
        assert!(fixture.tracker.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_unsynced_issue_is_skipped() {
        let fixture = Fixture::new(&[LocalIssue::new("a", "A")]);
        let warnings = fixture.reconcile("a", &EdgePlan::default()).await;
        assert!(warnings.is_empty());
        assert!(fixture.tracker.calls().is_empty());
    }
}
