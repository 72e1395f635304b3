//! ClickUp integration.
//!
//! Local issues become tasks in one list. Parent tasks are created first so
//! children can name their parent at create time. Tags are added one call
//! at a time; blocked-by edges become task dependencies (best-effort).
//! Milestone-type issues are plain tasks here.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{rate_limit_reset_wait, remove_record, require_local, HealthCheck, HealthReport, Integration, HEALTH_CONCURRENCY};
use crate::error::Result;
use crate::model::LocalIssue;
use crate::storage::IssueStore;
use crate::sync::diff::normalize_body;
use crate::sync::engine::{dedupe, depth_layers, RunLedger, ISSUE_CONCURRENCY};
use crate::sync::relations::plan_edges;
use crate::sync::{is_stale, SyncAction, SyncOptions, SyncRecord, SyncReport, SyncResult, SyncStateStore};
use crate::transport::{parse_retry_after, ApiError, ApiRequest, RetryConfig, ServiceHooks, Transport};

pub const SERVICE: &str = "clickup";
const TASK_WEB_BASE: &str = "https://app.clickup.com/t";

// ── Hooks ─────────────────────────────────────────────────────

struct ClickupHooks {
    token: String,
}

impl ServiceHooks for ClickupHooks {
    /// ClickUp takes the personal token as-is, without a scheme.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTHORIZATION, self.token.as_str())
    }

    fn retry_after(&self, headers: &HeaderMap) -> Option<Duration> {
        rate_limit_reset_wait(headers).or_else(|| parse_retry_after(headers))
    }

    fn format_error(&self, _status: StatusCode, body: &str) -> Option<String> {
        let parsed: ErrorPayload = serde_json::from_str(body).ok()?;
        Some(match parsed.ecode {
            Some(code) => format!("{} ({code})", parsed.err),
            None => parsed.err,
        })
    }
}

// ── Wire types ────────────────────────────────────────────────

#[derive(Deserialize)]
struct ErrorPayload {
    err: String,
    #[serde(rename = "ECODE")]
    ecode: Option<String>,
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: UserPayload,
}

#[derive(Deserialize)]
struct UserPayload {
    username: String,
}

#[derive(Deserialize)]
struct ListPayload {
    name: String,
}

#[derive(Deserialize)]
struct StatusPayload {
    status: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Deserialize)]
struct TagPayload {
    name: String,
}

#[derive(Deserialize)]
struct DependencyPayload {
    task_id: String,
    depends_on: String,
}

#[derive(Deserialize)]
struct TaskPayload {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    status: StatusPayload,
    #[serde(default)]
    tags: Vec<TagPayload>,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    dependencies: Vec<DependencyPayload>,
    url: Option<String>,
}

/// A ClickUp task as read during one sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: String,
    pub closed: bool,
    /// Lowercased; ClickUp stores tags in lowercase.
    pub tags: BTreeSet<String>,
    pub parent: Option<String>,
    /// IDs of tasks this one waits on.
    pub waiting_on: BTreeSet<String>,
    pub url: String,
}

impl Task {
    fn from_payload(p: TaskPayload, closed_status: &str) -> Self {
        let closed = matches!(p.status.kind.as_str(), "closed" | "done")
            || p.status.status.eq_ignore_ascii_case(closed_status);
        let waiting_on = p
            .dependencies
            .into_iter()
            .filter(|d| d.task_id == p.id)
            .map(|d| d.depends_on)
            .collect();
        Self {
            url: p.url.unwrap_or_else(|| task_url(&p.id)),
            id: p.id,
            name: p.name,
            description: p.description.unwrap_or_default(),
            status: p.status.status,
            closed,
            tags: p.tags.into_iter().map(|t| t.name.to_lowercase()).collect(),
            parent: p.parent,
            waiting_on,
        }
    }
}

fn task_url(id: &str) -> String {
    format!("{TASK_WEB_BASE}/{id}")
}

/// Fields for creating a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Changed fields of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl TaskPatch {
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.name.is_some() || self.description.is_some() || self.status.is_some()
    }
}

/// Minimal patch over title, body and open/closed state.
#[must_use]
pub fn build_task_update(task: &Task, issue: &LocalIssue, desired_status: &str) -> TaskPatch {
    TaskPatch {
        name: (task.name != issue.title).then(|| issue.title.clone()),
        description: (normalize_body(&task.description) != normalize_body(&issue.body))
            .then(|| issue.body.clone()),
        status: (task.closed != issue.status.is_closed()).then(|| desired_status.to_string()),
    }
}

// ── Client ────────────────────────────────────────────────────

/// REST client for one ClickUp list.
pub struct ClickupClient {
    transport: Transport,
    api_base: String,
    list_id: String,
    open_status: String,
    closed_status: String,
}

impl ClickupClient {
    /// # Errors
    ///
    /// Returns [`ApiError::Network`] if the HTTP client cannot be built.
    pub fn new(
        api_base: &str,
        list_id: &str,
        token: &str,
        retry: RetryConfig,
    ) -> std::result::Result<Self, ApiError> {
        let hooks = Arc::new(ClickupHooks {
            token: token.trim().to_string(),
        });
        Ok(Self {
            transport: Transport::new(hooks, retry)?,
            api_base: format!("{}/api/v2", api_base.trim_end_matches('/')),
            list_id: list_id.to_string(),
            open_status: "to do".to_string(),
            closed_status: "complete".to_string(),
        })
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.transport = self.transport.with_cancellation(cancel);
        self
    }

    #[must_use]
    pub fn with_statuses(mut self, open: &str, closed: &str) -> Self {
        self.open_status = open.to_string();
        self.closed_status = closed.to_string();
        self
    }

    fn status_for(&self, issue: &LocalIssue) -> &str {
        if issue.status.is_closed() {
            &self.closed_status
        } else {
            &self.open_status
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    /// `path` plus one user-supplied segment, percent-encoded so `/`, `#`
    /// and `?` stay inside it.
    fn url_with_segment(&self, path: &str, segment: &str) -> String {
        let base = self.url(path);
        let Ok(mut url) = reqwest::Url::parse(&base) else {
            // An unparsable base fails in the HTTP client with its own error.
            return base;
        };
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(segment);
        }
        url.into()
    }

    pub async fn current_user(&self) -> std::result::Result<String, ApiError> {
        let envelope: UserEnvelope = self.transport.json(&ApiRequest::get(self.url("/user"))).await?;
        Ok(envelope.user.username)
    }

    /// Name of the configured list.
    pub async fn list_name(&self) -> std::result::Result<String, ApiError> {
        let list: ListPayload = self
            .transport
            .json(&ApiRequest::get(self.url(&format!("/list/{}", self.list_id))))
            .await?;
        Ok(list.name)
    }

    pub async fn get_task(&self, id: &str) -> std::result::Result<Task, ApiError> {
        let payload: TaskPayload = self
            .transport
            .json(&ApiRequest::get(self.url(&format!("/task/{id}"))))
            .await?;
        Ok(Task::from_payload(payload, &self.closed_status))
    }

    pub async fn create_task(&self, fields: &NewTask) -> std::result::Result<Task, ApiError> {
        let request =
            ApiRequest::post(self.url(&format!("/list/{}/task", self.list_id))).json(fields)?;
        let payload: TaskPayload = self.transport.json(&request).await?;
        Ok(Task::from_payload(payload, &self.closed_status))
    }

    pub async fn update_task(&self, id: &str, patch: &TaskPatch) -> std::result::Result<Task, ApiError> {
        let request = ApiRequest::put(self.url(&format!("/task/{id}"))).json(patch)?;
        let payload: TaskPayload = self.transport.json(&request).await?;
        Ok(Task::from_payload(payload, &self.closed_status))
    }

    pub async fn add_tag(&self, task_id: &str, tag: &str) -> std::result::Result<(), ApiError> {
        let request = ApiRequest::post(self.url_with_segment(&format!("/task/{task_id}/tag"), tag));
        self.transport.send(&request).await
    }

    /// Make `task_id` wait on `depends_on`.
    pub async fn add_dependency(
        &self,
        task_id: &str,
        depends_on: &str,
    ) -> std::result::Result<(), ApiError> {
        let request = ApiRequest::post(self.url(&format!("/task/{task_id}/dependency")))
            .json(&serde_json::json!({ "depends_on": depends_on }))?;
        self.transport.send(&request).await
    }
}

// ── Integration ───────────────────────────────────────────────

pub struct ClickupIntegration {
    client: Arc<ClickupClient>,
    store: Arc<dyn IssueStore>,
    state: SyncStateStore,
    cancel: CancellationToken,
}

impl ClickupIntegration {
    #[must_use]
    pub fn new(client: ClickupClient, store: Arc<dyn IssueStore>, cancel: CancellationToken) -> Self {
        Self {
            client: Arc::new(client),
            state: SyncStateStore::new(store.clone(), SERVICE),
            store,
            cancel,
        }
    }

    async fn sync_task(&self, issue: &LocalIssue, ledger: &RunLedger<'_>) -> Result<SyncResult> {
        let opts = ledger.opts();
        let record = self.state.get(&issue.id)?;

        if let Some(key) = &record.remote_key {
            if !opts.force && !is_stale(issue.updated_at, record.synced_at) {
                return Ok(SyncResult::new(&issue.id, SyncAction::Skipped)
                    .with_key(key.clone())
                    .with_url(task_url(key)));
            }

            match self.client.get_task(key).await {
                Ok(task) => return self.update_task(issue, &task, ledger).await,
                Err(err) if err.is_not_found() => {
                    warn!(id = %issue.id, task = %key, "remote task is gone, recreating");
                    if !opts.dry_run {
                        self.state.clear(&issue.id);
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        if opts.dry_run {
            return Ok(SyncResult::new(&issue.id, SyncAction::WouldCreate));
        }

        let parent = if opts.disable_relationships {
            None
        } else {
            match &issue.parent {
                Some(parent_id) => self.state.get(parent_id)?.remote_key,
                None => None,
            }
        };
        let fields = NewTask {
            name: issue.title.clone(),
            description: issue.body.clone(),
            status: self.client.status_for(issue).to_string(),
            parent,
        };
        let task = self.client.create_task(&fields).await?;
        info!(id = %issue.id, task = %task.id, "created task");
        self.state.set_remote_key(&issue.id, &task.id)?;
        self.add_missing_tags(issue, &task, ledger).await;
        self.state.set_synced_at(&issue.id, Utc::now())?;

        Ok(SyncResult::new(&issue.id, SyncAction::Created)
            .with_key(task.id)
            .with_url(task.url))
    }

    async fn update_task(
        &self,
        issue: &LocalIssue,
        task: &Task,
        ledger: &RunLedger<'_>,
    ) -> Result<SyncResult> {
        let opts = ledger.opts();
        let patch = build_task_update(task, issue, self.client.status_for(issue));
        let tags_missing = issue
            .tags
            .iter()
            .any(|tag| !task.tags.contains(&tag.to_lowercase()));
        let result = |action| {
            SyncResult::new(&issue.id, action)
                .with_key(task.id.clone())
                .with_url(task.url.clone())
        };

        if !patch.has_changes() && !tags_missing {
            if !opts.dry_run {
                self.state.set_remote_key(&issue.id, &task.id)?;
                self.state.set_synced_at(&issue.id, Utc::now())?;
            }
            return Ok(result(SyncAction::Unchanged));
        }
        if opts.dry_run {
            return Ok(result(SyncAction::WouldUpdate));
        }

        if patch.has_changes() {
            debug!(id = %issue.id, task = %task.id, "updating task");
            self.client.update_task(&task.id, &patch).await?;
        }
        self.add_missing_tags(issue, task, ledger).await;
        self.state.set_remote_key(&issue.id, &task.id)?;
        self.state.set_synced_at(&issue.id, Utc::now())?;
        Ok(result(SyncAction::Updated))
    }

    async fn add_missing_tags(&self, issue: &LocalIssue, task: &Task, ledger: &RunLedger<'_>) {
        for tag in &issue.tags {
            if task.tags.contains(&tag.to_lowercase()) {
                continue;
            }
            if let Err(err) = self.client.add_tag(&task.id, tag).await {
                ledger.warn(format!("{}: could not add tag '{tag}': {err}", issue.id));
            }
        }
    }

    /// Add missing dependencies for the blocked-by edges of `issue`.
    async fn link_dependencies(&self, issue: &LocalIssue, blockers: &BTreeSet<String>, ledger: &RunLedger<'_>) {
        let Ok(record) = self.state.get(&issue.id) else {
            return;
        };
        let Some(key) = record.remote_key else {
            return;
        };
        let task = match self.client.get_task(&key).await {
            Ok(task) => task,
            Err(err) => {
                ledger.warn(format!("{}: could not read dependencies: {err}", issue.id));
                return;
            }
        };
        for blocker in blockers {
            let blocker_key = match self.state.get(blocker) {
                Ok(SyncRecord { remote_key: Some(k), .. }) => k,
                _ => {
                    ledger.warn(format!("{}: blocker {blocker} is not synced", issue.id));
                    continue;
                }
            };
            if task.waiting_on.contains(&blocker_key) {
                continue;
            }
            if let Err(err) = self.client.add_dependency(&key, &blocker_key).await {
                ledger.warn(format!("{}: could not add dependency on {blocker}: {err}", issue.id));
            }
        }
    }
}

#[async_trait]
impl Integration for ClickupIntegration {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn sync(&self, issues: &[LocalIssue], opts: &SyncOptions) -> Result<SyncReport> {
        let issues = dedupe(issues);
        let ledger = RunLedger::new(&issues, opts);
        info!(list = %self.client.list_id, issues = issues.len(), dry_run = opts.dry_run, "pushing to ClickUp");

        let all: Vec<&LocalIssue> = issues.iter().collect();
        let layers = depth_layers(&all, |id| ledger.in_run(id));
        for (depth, layer) in layers {
            debug!(depth, count = layer.len(), "task pass");
            let ledger = &ledger;
            ledger
                .fan_out(layer, &self.cancel, |issue| self.sync_task(issue, ledger))
                .await;
        }

        if !opts.dry_run && !opts.disable_relationships {
            let plans = plan_edges(&issues);
            let blocked: Vec<(&LocalIssue, &BTreeSet<String>)> = issues
                .iter()
                .filter_map(|issue| Some((issue, &plans.get(&issue.id)?.blocked_by)))
                .filter(|(_, blockers)| !blockers.is_empty())
                .collect();
            let ledger = &ledger;
            let futures: Vec<_> = blocked
                .into_iter()
                .map(|(issue, blockers)| self.link_dependencies(issue, blockers, ledger).boxed())
                .collect();
            stream::iter(futures)
                .buffer_unordered(ISSUE_CONCURRENCY)
                .collect::<Vec<()>>()
                .await;
        }

        if self.cancel.is_cancelled() {
            ledger.warn("push cancelled before completion".to_string());
        }

        let flushed = self.state.flush()?;
        let report = ledger.into_report();
        info!(records = flushed, failed = report.failed(), "ClickUp push finished");
        Ok(report)
    }

    async fn link(&self, id: &str, remote: &str) -> Result<SyncRecord> {
        require_local(self.store.as_ref(), id)?;
        let key = remote
            .trim()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .trim_start_matches('#');
        let task = self.client.get_task(key).await?;
        self.state.set_remote_key(id, &task.id)?;
        self.state.set_synced_at(id, Utc::now())?;
        self.state.flush()?;
        info!(id, task = %task.id, "linked");
        self.state.get(id)
    }

    async fn unlink(&self, id: &str) -> Result<()> {
        remove_record(self.store.as_ref(), id, SERVICE)?;
        info!(id, "unlinked");
        Ok(())
    }

    async fn health_check(&self, issues: &[LocalIssue]) -> Result<HealthReport> {
        let mut checks = Vec::new();
        match self.client.current_user().await {
            Ok(user) => checks.push(HealthCheck::pass("credentials", format!("authenticated as {user}"))),
            Err(err) => checks.push(HealthCheck::fail("credentials", err.to_string())),
        }
        match self.client.list_name().await {
            Ok(name) => checks.push(HealthCheck::pass("list", name)),
            Err(err) => checks.push(HealthCheck::fail("list", err.to_string())),
        }

        let keys: Vec<(String, String)> = issues
            .iter()
            .filter_map(|issue| {
                let key = self.state.get(&issue.id).ok()?.remote_key?;
                Some((issue.id.clone(), key))
            })
            .collect();
        let total = keys.len();
        let mut missing: Vec<String> = stream::iter(keys)
            .map(|(id, key)| async move { self.client.get_task(&key).await.err().map(|_| id) })
            .buffer_unordered(HEALTH_CONCURRENCY)
            .filter_map(|outcome| async move { outcome })
            .collect()
            .await;
        missing.sort();
        checks.push(if missing.is_empty() {
            HealthCheck::pass("records", format!("{total} linked tasks resolve"))
        } else {
            HealthCheck::fail(
                "records",
                format!("{} of {total} linked tasks do not resolve: {}", missing.len(), missing.join(", ")),
            )
        });

        Ok(HealthReport {
            service: SERVICE.to_string(),
            checks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IssueStatus;
    use crate::storage::SqliteStorage;
    use serde_json::{json, Value};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ClickupClient {
        let retry = RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            rate_limit_delay: Duration::ZERO,
        };
        ClickupClient::new(&server.uri(), "901", "pk_test", retry).unwrap()
    }

    fn task_json(id: &str, name: &str, status: &str, kind: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "description": "",
            "status": {"status": status, "type": kind},
            "tags": [],
            "parent": null,
            "dependencies": [],
            "url": format!("https://app.clickup.com/t/{id}"),
        })
    }

    fn integration(server: &MockServer, storage: &Arc<SqliteStorage>) -> ClickupIntegration {
        ClickupIntegration::new(client(server), storage.clone(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_cancelled_push_fails_each_task_without_requests() {
        let server = MockServer::start().await;
        let storage = Arc::new(SqliteStorage::open_memory().unwrap());
        storage.create_issue(&LocalIssue::new("p", "Parent")).unwrap();
        storage
            .create_issue(&LocalIssue::new("c", "Child").with_parent("p"))
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = ClickupIntegration::new(client(&server), storage.clone(), cancel)
            .sync(&storage.all_issues().unwrap(), &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.failed(), 2);
        assert!(report.warnings.iter().any(|w| w.contains("cancelled")));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_raw_token_and_task_mapping() {
        let server = MockServer::start().await;
        let mut payload = task_json("abc", "Fix bug", "complete", "closed");
        payload["tags"] = json!([{"name": "Frontend"}]);
        payload["dependencies"] = json!([
            {"task_id": "abc", "depends_on": "xyz", "type": 1},
            {"task_id": "other", "depends_on": "abc", "type": 1}
        ]);
        Mock::given(method("GET"))
            .and(path("/api/v2/task/abc"))
            .and(header("authorization", "pk_test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(payload))
            .expect(1)
            .mount(&server)
            .await;

        let task = client(&server).get_task("abc").await.unwrap();
        assert!(task.closed);
        assert!(task.tags.contains("frontend"));
        assert_eq!(task.waiting_on, BTreeSet::from(["xyz".to_string()]));
    }

    #[tokio::test]
    async fn test_tag_is_one_encoded_path_segment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/task/c1/tag/ops%2Finfra%20%231%3F"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).add_tag("c1", "ops/infra #1?").await.unwrap();
    }

    #[test]
    fn test_task_patch_is_minimal() {
        let task = Task {
            id: "abc".into(),
            name: "Fix bug".into(),
            description: "Details\n".into(),
            status: "to do".into(),
            closed: false,
            tags: BTreeSet::new(),
            parent: None,
            waiting_on: BTreeSet::new(),
            url: task_url("abc"),
        };
        let same = LocalIssue::new("t1", "Fix bug").with_body("Details");
        assert!(!build_task_update(&task, &same, "to do").has_changes());

        let closed = same.with_status(IssueStatus::Closed);
        let patch = build_task_update(&task, &closed, "complete");
        assert_eq!(
            patch,
            TaskPatch {
                status: Some("complete".into()),
                ..TaskPatch::default()
            }
        );
    }

    #[tokio::test]
    async fn test_push_creates_parent_before_child() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/list/901/task"))
            .and(body_json(json!({"name": "Parent", "description": "", "status": "to do"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(task_json("p1", "Parent", "to do", "open")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/list/901/task"))
            .and(body_json(json!({"name": "Child", "description": "", "status": "to do", "parent": "p1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(task_json("c1", "Child", "to do", "open")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/task/c1/tag/backend"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let storage = Arc::new(SqliteStorage::open_memory().unwrap());
        storage.create_issue(&LocalIssue::new("p", "Parent")).unwrap();
        storage
            .create_issue(&LocalIssue::new("c", "Child").with_parent("p").with_tag("backend"))
            .unwrap();

        let mut issues = storage.all_issues().unwrap();
        issues.reverse();
        let report = integration(&server, &storage)
            .sync(&issues, &SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(report.get("p").unwrap().action, SyncAction::Created);
        let child = report.get("c").unwrap();
        assert_eq!(child.action, SyncAction::Created);
        assert_eq!(child.key.as_deref(), Some("c1"));

        let stored = storage.get_sync_extension("c", SERVICE).unwrap().unwrap();
        assert_eq!(stored["key"], "c1");
    }

    #[tokio::test]
    async fn test_closing_an_issue_updates_status_only() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/task/abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(task_json("abc", "Fix bug", "to do", "open")))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/v2/task/abc"))
            .and(body_json(json!({"status": "complete"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(task_json("abc", "Fix bug", "complete", "closed")))
            .expect(1)
            .mount(&server)
            .await;

        let storage = Arc::new(SqliteStorage::open_memory().unwrap());
        storage
            .create_issue(&LocalIssue::new("t1", "Fix bug").with_status(IssueStatus::Closed))
            .unwrap();
        let integration = integration(&server, &storage);
        integration.state.set_remote_key("t1", "abc").unwrap();
        integration.state.flush().unwrap();

        let report = integration
            .sync(&storage.all_issues().unwrap(), &SyncOptions::default())
            .await
            .unwrap();
        assert_eq!(report.get("t1").unwrap().action, SyncAction::Updated);
    }

    #[tokio::test]
    async fn test_dependencies_are_added_once() {
        let server = MockServer::start().await;
        let mut blocked = task_json("b1", "B", "to do", "open");
        blocked["dependencies"] = json!([]);
        Mock::given(method("GET"))
            .and(path("/api/v2/task/b1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(blocked))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v2/task/b1/dependency"))
            .and(body_json(json!({"depends_on": "a1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let storage = Arc::new(SqliteStorage::open_memory().unwrap());
        storage.create_issue(&LocalIssue::new("a", "A")).unwrap();
        storage.create_issue(&LocalIssue::new("b", "B")).unwrap();
        storage.add_block("a", "b").unwrap();
        let integration = integration(&server, &storage);
        for (id, key) in [("a", "a1"), ("b", "b1")] {
            integration.state.set_remote_key(id, key).unwrap();
            integration.state.set_synced_at(id, Utc::now() + chrono::Duration::hours(1)).unwrap();
        }
        integration.state.flush().unwrap();

        let report = integration
            .sync(&storage.all_issues().unwrap(), &SyncOptions::default())
            .await
            .unwrap();
        assert!(report.results.iter().all(|r| r.action == SyncAction::Skipped));
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[tokio::test]
    async fn test_error_payload_is_formatted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/task/zzz"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"err": "Token invalid", "ECODE": "OAUTH_025"})))
            .mount(&server)
            .await;

        let err = client(&server).get_task("zzz").await.unwrap_err();
        assert_eq!(err.to_string(), "HTTP 401: Token invalid (OAUTH_025)");
    }

    #[tokio::test]
    async fn test_link_accepts_task_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/task/86abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(task_json("86abc", "A", "to do", "open")))
            .mount(&server)
            .await;

        let storage = Arc::new(SqliteStorage::open_memory().unwrap());
        storage.create_issue(&LocalIssue::new("a", "A")).unwrap();
        let record = integration(&server, &storage)
            .link("a", "https://app.clickup.com/t/86abc")
            .await
            .unwrap();
        assert_eq!(record.remote_key.as_deref(), Some("86abc"));
    }
}
