//! Multi-pass syncer.
//!
//! One run walks the input set in structural order:
//!
//! 1. Warm-up: authenticated identity and label set, cached for the run
//! 2. Label provisioning: create missing labels (bounded fan-out)
//! 3. Milestones, sequentially
//! 4. Issues whose parent is absent or outside the run (bounded fan-out)
//! 5. Remaining issues, one layer per nesting depth
//! 6. Relationship reconciliation (bounded fan-out)
//!
//! Each pass is a barrier: later passes read remote identifiers that only
//! earlier passes record. All identifiers go through the
//! [`SyncStateStore`], flushed once at the end of the run.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{IssueType, LocalIssue};
use crate::storage::IssueStore;
use crate::sync::diff::{build_milestone_update, build_update, UpdatePatch};
use crate::sync::relations::{plan_edges, Reconciler};
use crate::sync::state::{is_stale, SyncStateStore};
use crate::sync::tracker::{IssueTracker, NewIssue, NewMilestone, RemoteIssue, RemoteMilestone, RemoteState};
use crate::sync::types::{Progress, RunCache, SyncAction, SyncOptions, SyncReport, SyncResult};

/// Workers per issue pass and for relationship reconciliation.
pub const ISSUE_CONCURRENCY: usize = 10;
/// Workers for label provisioning.
pub const LABEL_CONCURRENCY: usize = 5;

/// Service-level switches that do not change between runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncerSettings {
    /// Assign newly created issues to the authenticated user.
    pub assign_self: bool,
    /// Send issue types (Bug/Feature/Task) to the remote.
    pub map_issue_types: bool,
}

/// Remote issue-type name for a local type.
#[must_use]
pub const fn remote_type_name(issue_type: IssueType) -> Option<&'static str> {
    match issue_type {
        IssueType::Bug => Some("Bug"),
        IssueType::Feature | IssueType::Epic => Some("Feature"),
        IssueType::Task | IssueType::Chore => Some("Task"),
        IssueType::Milestone => None,
    }
}

const fn remote_state(issue: &LocalIssue) -> RemoteState {
    if issue.status.is_closed() {
        RemoteState::Closed
    } else {
        RemoteState::Open
    }
}

struct Desired {
    state: RemoteState,
    issue_type: Option<String>,
    labels: Vec<String>,
    milestone: Option<u64>,
}

struct Progressive {
    completed: usize,
    results: Vec<Option<SyncResult>>,
    warnings: Vec<String>,
}

/// Bookkeeping shared by every push pass over one run: one result slot
/// per issue in input order, progress reported under the same lock, and
/// the warnings collected along the way.
pub(crate) struct RunLedger<'a> {
    issues: &'a [LocalIssue],
    index: HashMap<&'a str, usize>,
    opts: &'a SyncOptions,
    shared: Mutex<Progressive>,
}

impl<'a> RunLedger<'a> {
    pub(crate) fn new(issues: &'a [LocalIssue], opts: &'a SyncOptions) -> Self {
        Self {
            issues,
            index: issues
                .iter()
                .enumerate()
                .map(|(i, issue)| (issue.id.as_str(), i))
                .collect(),
            opts,
            shared: Mutex::new(Progressive {
                completed: 0,
                results: vec![None; issues.len()],
                warnings: Vec::new(),
            }),
        }
    }

    pub(crate) const fn issues(&self) -> &'a [LocalIssue] {
        self.issues
    }

    pub(crate) const fn opts(&self) -> &'a SyncOptions {
        self.opts
    }

    fn lock(&self) -> MutexGuard<'_, Progressive> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn in_run(&self, id: &str) -> Option<&'a LocalIssue> {
        self.index.get(id).map(|i| &self.issues[*i])
    }

    pub(crate) fn warn(&self, message: String) {
        warn!("{message}");
        self.lock().warnings.push(message);
    }

    /// Append warnings already logged by their producer.
    pub(crate) fn extend_warnings(&self, warnings: impl IntoIterator<Item = String>) {
        self.lock().warnings.extend(warnings);
    }

    /// Record a result; progress is reported under the same lock.
    fn finish(&self, issue: &LocalIssue, result: SyncResult) {
        let mut shared = self.lock();
        shared.completed += 1;
        if let Some(progress) = &self.opts.progress {
            progress(&Progress {
                completed: shared.completed,
                total: self.issues.len(),
                id: issue.id.clone(),
                action: result.action,
            });
        }
        if let Some(slot) = self.index.get(issue.id.as_str()) {
            shared.results[*slot] = Some(result);
        }
    }

    pub(crate) fn action_of(&self, id: &str) -> Option<SyncAction> {
        let slot = self.index.get(id)?;
        self.lock().results[*slot].as_ref().map(|r| r.action)
    }

    /// Drive `work` for `issue` unless the run is cancelled, then record
    /// its outcome. An error becomes that issue's failed result.
    pub(crate) async fn settle(
        &self,
        issue: &LocalIssue,
        cancel: &CancellationToken,
        work: impl Future<Output = Result<SyncResult>>,
    ) {
        let result = if cancel.is_cancelled() {
            SyncResult::failed(&issue.id, "cancelled")
        } else {
            work.await.unwrap_or_else(|err| {
                warn!(id = %issue.id, error = %err, "sync failed");
                SyncResult::failed(&issue.id, err)
            })
        };
        self.finish(issue, result);
    }

    /// [`RunLedger::settle`] every issue of `batch`, up to
    /// [`ISSUE_CONCURRENCY`] at a time.
    pub(crate) async fn fan_out<F, Fut>(
        &self,
        batch: Vec<&'a LocalIssue>,
        cancel: &CancellationToken,
        work: F,
    ) where
        F: Fn(&'a LocalIssue) -> Fut + Sync,
        Fut: Future<Output = Result<SyncResult>> + Send,
    {
        let work = &work;
        let futures: Vec<_> = batch
            .into_iter()
            .map(|issue| self.settle(issue, cancel, work(issue)).boxed())
            .collect();
        stream::iter(futures)
            .buffer_unordered(ISSUE_CONCURRENCY)
            .collect::<Vec<()>>()
            .await;
    }

    pub(crate) fn into_report(self) -> SyncReport {
        let shared = self.shared.into_inner().unwrap_or_else(PoisonError::into_inner);
        let results = shared
            .results
            .into_iter()
            .zip(self.issues)
            .map(|(result, issue)| {
                result.unwrap_or_else(|| SyncResult::failed(&issue.id, "not processed"))
            })
            .collect();
        SyncReport {
            results,
            warnings: shared.warnings,
        }
    }
}

/// `issues` without repeated IDs; the first occurrence wins.
pub(crate) fn dedupe(issues: &[LocalIssue]) -> Vec<LocalIssue> {
    let mut seen = HashSet::new();
    issues
        .iter()
        .filter(|issue| seen.insert(issue.id.as_str()))
        .cloned()
        .collect()
}

/// Shared state of one GitHub run.
struct Run<'a> {
    ledger: RunLedger<'a>,
    cache: RunCache,
}

/// Pushes local issues to one remote tracker.
pub struct Syncer {
    tracker: Arc<dyn IssueTracker>,
    store: Arc<dyn IssueStore>,
    state: SyncStateStore,
    settings: SyncerSettings,
    cancel: CancellationToken,
}

impl Syncer {
    #[must_use]
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        store: Arc<dyn IssueStore>,
        service: &str,
        settings: SyncerSettings,
    ) -> Self {
        Self {
            state: SyncStateStore::new(store.clone(), service),
            tracker,
            store,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn state(&self) -> &SyncStateStore {
        &self.state
    }

    #[must_use]
    pub fn tracker(&self) -> &dyn IssueTracker {
        self.tracker.as_ref()
    }

    /// Run all passes over `issues` and return one result per issue, in
    /// input order. Duplicate IDs are synced once.
    ///
    /// # Errors
    ///
    /// Only run-level failures are errors: per-issue failures are reported
    /// in the results. Fails if the final sync-state flush fails.
    pub async fn sync(&self, issues: &[LocalIssue], opts: &SyncOptions) -> Result<SyncReport> {
        let issues = dedupe(issues);

        info!(
            service = self.state.service(),
            issues = issues.len(),
            dry_run = opts.dry_run,
            force = opts.force,
            "starting sync"
        );

        let ledger = RunLedger::new(&issues, opts);
        let cache = self.warm_up(&ledger).await;
        let mut run = Run { ledger, cache };
        if !opts.dry_run {
            self.provision_labels(&mut run).await;
        }

        let (milestones, rest): (Vec<&LocalIssue>, Vec<&LocalIssue>) =
            issues.iter().partition(|i| i.issue_type.is_milestone());

        debug!(count = milestones.len(), "milestone pass");
        for issue in milestones {
            run.ledger
                .settle(issue, &self.cancel, self.sync_milestone(issue, &run))
                .await;
        }

        let layers = depth_layers(&rest, |id| run.ledger.in_run(id));
        for (depth, layer) in layers {
            debug!(depth, count = layer.len(), "issue pass");
            let run = &run;
            run.ledger
                .fan_out(layer, &self.cancel, |issue| self.sync_issue(issue, run))
                .await;
        }

        if !opts.disable_relationships && !opts.dry_run {
            self.reconcile_relationships(&run).await;
        }

        if self.cancel.is_cancelled() {
            run.ledger.warn("sync cancelled before completion".to_string());
        }

        let flushed = self.state.flush()?;
        let report = run.ledger.into_report();
        info!(
            service = self.state.service(),
            records = flushed,
            failed = report.failed(),
            warnings = report.warnings.len(),
            "sync finished"
        );
        Ok(report)
    }

    async fn warm_up(&self, ledger: &RunLedger<'_>) -> RunCache {
        let mut cache = RunCache::default();
        match self.tracker.current_user().await {
            Ok(user) => {
                debug!(user = %user, "authenticated");
                cache.user = Some(user);
            }
            Err(err) => ledger.warn(format!("could not fetch authenticated user: {err}")),
        }
        match self.tracker.list_labels().await {
            Ok(labels) => {
                for label in &labels {
                    cache.add_label(label);
                }
            }
            Err(err) => ledger.warn(format!("could not list labels: {err}")),
        }
        cache
    }

    async fn provision_labels(&self, run: &mut Run<'_>) {
        let issues = run.ledger.issues();
        let wanted: BTreeSet<&str> = issues
            .iter()
            .filter(|i| !i.issue_type.is_milestone())
            .flat_map(|i| i.tags.iter().map(String::as_str))
            .filter(|tag| !run.cache.has_label(tag))
            .collect();
        if wanted.is_empty() {
            return;
        }

        debug!(count = wanted.len(), "provisioning labels");
        let tracker = self.tracker.as_ref();
        let outcomes: Vec<(&str, std::result::Result<(), _>)> = stream::iter(
            wanted
                .into_iter()
                .map(|name| async move { (name, tracker.create_label(name).await) }.boxed())
                .collect::<Vec<_>>(),
        )
            .buffer_unordered(LABEL_CONCURRENCY)
            .collect()
            .await;

        for (name, outcome) in outcomes {
            match outcome {
                Ok(()) => run.cache.add_label(name),
                Err(err) => run.ledger.warn(format!("could not create label '{name}': {err}")),
            }
        }
    }

    // ── Issues ────────────────────────────────────────────────

    async fn sync_issue(&self, issue: &LocalIssue, run: &Run<'_>) -> Result<SyncResult> {
        let record = self.state.get(&issue.id)?;

        if let Some(number) = record.number {
            if !run.ledger.opts().force && !is_stale(issue.updated_at, record.synced_at) {
                return Ok(SyncResult::new(&issue.id, SyncAction::Skipped)
                    .with_number(number)
                    .with_url(self.tracker.issue_url(number)));
            }

            match self.tracker.get_issue(number).await {
                Ok(remote) => return self.update_issue(issue, &remote, run).await,
                Err(err) if err.is_not_found() => {
                    warn!(id = %issue.id, number, "remote issue is gone, recreating");
                    if !run.ledger.opts().dry_run {
                        self.state.clear(&issue.id);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        self.create_issue(issue, run).await
    }

    fn desired(&self, issue: &LocalIssue, run: &Run<'_>) -> Result<Desired> {
        Ok(Desired {
            state: remote_state(issue),
            issue_type: if self.settings.map_issue_types {
                remote_type_name(issue.issue_type).map(String::from)
            } else {
                None
            },
            labels: issue.tags.iter().cloned().collect(),
            milestone: self.milestone_for(issue, run)?,
        })
    }

    fn parent_of(&self, issue: &LocalIssue, run: &Run<'_>) -> Result<Option<LocalIssue>> {
        let Some(parent_id) = &issue.parent else {
            return Ok(None);
        };
        match run.ledger.in_run(parent_id) {
            Some(parent) => Ok(Some(parent.clone())),
            None => self.store.get(parent_id),
        }
    }

    /// Milestone number assigned through a milestone-type parent.
    fn milestone_for(&self, issue: &LocalIssue, run: &Run<'_>) -> Result<Option<u64>> {
        match self.parent_of(issue, run)? {
            Some(parent) if parent.issue_type.is_milestone() => {
                Ok(self.state.get(&parent.id)?.milestone)
            }
            _ => Ok(None),
        }
    }

    async fn update_issue(
        &self,
        issue: &LocalIssue,
        remote: &RemoteIssue,
        run: &Run<'_>,
    ) -> Result<SyncResult> {
        let desired = self.desired(issue, run)?;
        let patch = build_update(
            remote,
            issue,
            &issue.body,
            desired.state,
            desired.issue_type.as_deref(),
            &desired.labels,
            desired.milestone,
        );
        let result = |action| {
            SyncResult::new(&issue.id, action)
                .with_number(remote.number)
                .with_url(remote.url.clone())
        };

        if !patch.has_changes() {
            if !run.ledger.opts().dry_run {
                self.state.set(&issue.id, remote.number, Some(remote.id))?;
                self.state.set_synced_at(&issue.id, Utc::now())?;
            }
            return Ok(result(SyncAction::Unchanged));
        }

        if run.ledger.opts().dry_run {
            debug!(id = %issue.id, fields = ?patch.changed_fields(), "would update");
            return Ok(result(SyncAction::WouldUpdate));
        }

        debug!(id = %issue.id, number = remote.number, fields = ?patch.changed_fields(), "updating");
        let updated = self.tracker.update_issue(remote.number, &patch).await?;
        self.state.set(&issue.id, updated.number, Some(updated.id))?;
        self.state.set_synced_at(&issue.id, Utc::now())?;
        Ok(result(SyncAction::Updated))
    }

    async fn create_issue(&self, issue: &LocalIssue, run: &Run<'_>) -> Result<SyncResult> {
        if run.ledger.opts().dry_run {
            return Ok(SyncResult::new(&issue.id, SyncAction::WouldCreate));
        }

        let desired = self.desired(issue, run)?;
        let assignees = match (&run.cache.user, self.settings.assign_self) {
            (Some(user), true) => vec![user.clone()],
            _ => Vec::new(),
        };
        let fields = NewIssue {
            title: issue.title.clone(),
            body: issue.body.clone(),
            labels: desired.labels,
            assignees,
            issue_type: desired.issue_type,
            milestone: desired.milestone,
        };

        let created = self.tracker.create_issue(&fields).await?;
        info!(id = %issue.id, number = created.number, "created remote issue");
        // Recorded before anything else can fail, so a retry never duplicates it.
        self.state.set(&issue.id, created.number, Some(created.id))?;

        let mut result = SyncResult::new(&issue.id, SyncAction::Created)
            .with_number(created.number)
            .with_url(created.url.clone());

        if desired.state == RemoteState::Closed {
            if let Err(err) = self
                .tracker
                .update_issue(created.number, &UpdatePatch::state(RemoteState::Closed))
                .await
            {
                result.action = SyncAction::Error;
                result.error = Some(format!("created but could not close: {err}"));
                return Ok(result);
            }
        }

        if !run.ledger.opts().disable_relationships {
            self.link_new_child(issue, &created, run).await?;
        }

        self.state.set_synced_at(&issue.id, Utc::now())?;
        Ok(result)
    }

    async fn link_new_child(&self, issue: &LocalIssue, created: &RemoteIssue, run: &Run<'_>) -> Result<()> {
        let Some(parent) = self.parent_of(issue, run)? else {
            return Ok(());
        };
        if parent.issue_type.is_milestone() {
            return Ok(());
        }
        let Some(parent_number) = self.state.get(&parent.id)?.number else {
            debug!(id = %issue.id, parent = %parent.id, "parent not synced yet");
            return Ok(());
        };
        if let Err(err) = self
            .tracker
            .add_sub_issue(parent_number, created.id, false)
            .await
        {
            run.ledger.warn(format!("{}: could not link to parent {}: {err}", issue.id, parent.id));
        }
        Ok(())
    }

    // ── Milestones ────────────────────────────────────────────

    async fn sync_milestone(&self, issue: &LocalIssue, run: &Run<'_>) -> Result<SyncResult> {
        let record = self.state.get(&issue.id)?;

        if let Some(number) = record.milestone {
            if !run.ledger.opts().force && !is_stale(issue.updated_at, record.synced_at) {
                return Ok(SyncResult::new(&issue.id, SyncAction::Skipped)
                    .with_number(number)
                    .with_url(self.tracker.milestone_url(number)));
            }

            match self.tracker.get_milestone(number).await {
                Ok(remote) => {
                    return self
                        .update_milestone(issue, &remote, run, SyncAction::Updated)
                        .await;
                }
                Err(err) if err.is_not_found() => {
                    warn!(id = %issue.id, number, "remote milestone is gone, recreating");
                    if !run.ledger.opts().dry_run {
                        self.state.clear(&issue.id);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        if run.ledger.opts().dry_run {
            return Ok(SyncResult::new(&issue.id, SyncAction::WouldCreate));
        }

        let fields = NewMilestone {
            title: issue.title.clone(),
            description: issue.body.clone(),
            state: remote_state(issue),
        };
        match self.tracker.create_milestone(&fields).await {
            Ok(created) => {
                info!(id = %issue.id, number = created.number, "created milestone");
                self.state.set_milestone(&issue.id, created.number)?;
                self.state.set_synced_at(&issue.id, Utc::now())?;
                Ok(SyncResult::new(&issue.id, SyncAction::Created)
                    .with_number(created.number)
                    .with_url(created.url))
            }
            Err(err) if err.status() == Some(422) => {
                let existing = self
                    .tracker
                    .list_milestones()
                    .await?
                    .into_iter()
                    .find(|m| m.title == issue.title);
                match existing {
                    Some(existing) => {
                        info!(id = %issue.id, number = existing.number, "adopting existing milestone");
                        self.update_milestone(issue, &existing, run, SyncAction::Created)
                            .await
                    }
                    None => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Converge an existing milestone. `changed` is the action reported
    /// when a write happens or the record is new.
    async fn update_milestone(
        &self,
        issue: &LocalIssue,
        remote: &RemoteMilestone,
        run: &Run<'_>,
        changed: SyncAction,
    ) -> Result<SyncResult> {
        let patch = build_milestone_update(remote, &issue.title, &issue.body, remote_state(issue));
        let result = |action| {
            SyncResult::new(&issue.id, action)
                .with_number(remote.number)
                .with_url(remote.url.clone())
        };

        if !patch.has_changes() {
            if !run.ledger.opts().dry_run {
                self.state.set_milestone(&issue.id, remote.number)?;
                self.state.set_synced_at(&issue.id, Utc::now())?;
            }
            let action = if changed == SyncAction::Created {
                changed
            } else {
                SyncAction::Unchanged
            };
            return Ok(result(action));
        }

        if run.ledger.opts().dry_run {
            return Ok(result(SyncAction::WouldUpdate));
        }

        let updated = self.tracker.update_milestone(remote.number, &patch).await?;
        self.state.set_milestone(&issue.id, updated.number)?;
        self.state.set_synced_at(&issue.id, Utc::now())?;
        Ok(result(changed))
    }

    // ── Relationships ─────────────────────────────────────────

    async fn reconcile_relationships(&self, run: &Run<'_>) {
        let plans = plan_edges(run.ledger.issues());
        let targets: Vec<&LocalIssue> = run
            .ledger
            .issues()
            .iter()
            .filter(|issue| !issue.issue_type.is_milestone())
            .filter(|issue| {
                let planned = plans
                    .get(&issue.id)
                    .is_some_and(|p| !p.blocked_by.is_empty() || !p.blocking_outside.is_empty());
                // A processed issue may have just lost its last edge; the
                // remote side still carries it until reconciled.
                let processed = matches!(
                    run.ledger.action_of(&issue.id),
                    Some(SyncAction::Created | SyncAction::Updated | SyncAction::Unchanged)
                );
                issue.has_relationships() || planned || processed
            })
            .collect();
        if targets.is_empty() {
            return;
        }

        debug!(count = targets.len(), "relationship pass");
        let reconciler = Reconciler::new(self.tracker.as_ref(), &self.state, self.store.as_ref());
        let reconciler = &reconciler;
        let plans = &plans;
        let warnings: Vec<Vec<String>> = stream::iter(
            targets
                .into_iter()
                .map(|issue| {
                async move {
                    match plans.get(&issue.id) {
                        Some(plan) => reconciler.reconcile(issue, plan).await,
                        None => Vec::new(),
                    }
                }
                .boxed()
            })
                .collect::<Vec<_>>(),
        )
            .buffer_unordered(ISSUE_CONCURRENCY)
            .collect()
            .await;

        run.ledger.extend_warnings(warnings.into_iter().flatten());
    }
}

/// Group issues by nesting depth within the run.
///
/// Depth 0 holds issues whose parent is absent or outside the run.
pub(crate) fn depth_layers<'a>(
    issues: &[&'a LocalIssue],
    in_run: impl Fn(&str) -> Option<&'a LocalIssue>,
) -> BTreeMap<usize, Vec<&'a LocalIssue>> {
    let mut layers: BTreeMap<usize, Vec<&'a LocalIssue>> = BTreeMap::new();
    for issue in issues {
        let mut depth = 0;
        let mut visited = HashSet::from([issue.id.as_str()]);
        let mut current = issue.parent.as_deref();
        while let Some(parent_id) = current {
            let Some(parent) = in_run(parent_id) else {
                break;
            };
            if !visited.insert(parent_id) {
                break;
            }
            depth += 1;
            current = parent.parent.as_deref();
        }
        layers.entry(depth).or_default().push(*issue);
    }
    layers
}
