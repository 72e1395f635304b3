//! GitHub integration.
//!
//! [`GithubClient`] implements [`IssueTracker`] over the REST API; the
//! multi-pass [`Syncer`] does the rest. Routes used:
//!
//! - `GET /user`
//! - `GET|POST /repos/{owner}/{repo}/labels`
//! - `GET|POST|PATCH /repos/{owner}/{repo}/issues[/{number}]`
//! - `GET|POST|PATCH /repos/{owner}/{repo}/milestones[/{number}]`
//! - `GET .../issues/{number}/parent`, `POST .../sub_issues`, `DELETE .../sub_issue`
//! - `GET|POST|DELETE .../issues/{number}/dependencies/blocked_by`

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    parse_number_ref, rate_limit_reset_wait, remove_record, require_local, HealthCheck,
    HealthReport, Integration, HEALTH_CONCURRENCY,
};
use crate::config::DEFAULT_GITHUB_API;
use crate::error::Result;
use crate::model::LocalIssue;
use crate::storage::IssueStore;
use crate::sync::{
    IssueTracker, MilestonePatch, NewIssue, NewMilestone, RemoteIssue, RemoteMilestone,
    RemoteState, SyncOptions, SyncRecord, SyncReport, Syncer, SyncerSettings, UpdatePatch,
};
use crate::transport::{
    parse_retry_after, ApiError, ApiRequest, RetryConfig, ServiceHooks, Transport,
};

pub const SERVICE: &str = "github";
pub const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: usize = 100;
const LABEL_COLOR: &str = "ededed";

// ── Hooks ─────────────────────────────────────────────────────

struct GithubHooks {
    token: String,
}

impl ServiceHooks for GithubHooks {
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header(USER_AGENT, concat!("hubsync/", env!("CARGO_PKG_VERSION")))
    }

    fn retry_after(&self, headers: &HeaderMap) -> Option<Duration> {
        parse_retry_after(headers).or_else(|| rate_limit_reset_wait(headers))
    }

    /// `message` plus any `errors[].code`, e.g. `Validation Failed (already_exists)`.
    fn format_error(&self, status: StatusCode, body: &str) -> Option<String> {
        let parsed: ErrorPayload = serde_json::from_str(body).ok()?;
        let codes: Vec<&str> = parsed
            .errors
            .iter()
            .filter_map(|e| e.code.as_deref().or(e.message.as_deref()))
            .collect();
        let message = if codes.is_empty() {
            parsed.message
        } else {
            format!("{} ({})", parsed.message, codes.join(", "))
        };
        debug!(status = status.as_u16(), %message, "github error");
        Some(message)
    }
}

// ── Wire types ────────────────────────────────────────────────

#[derive(Deserialize)]
struct ErrorPayload {
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct UserPayload {
    login: String,
}

#[derive(Deserialize)]
struct LabelPayload {
    name: String,
}

#[derive(Deserialize)]
struct TypePayload {
    name: String,
}

#[derive(Deserialize)]
struct MilestoneRef {
    number: u64,
}

#[derive(Deserialize)]
struct IssuePayload {
    id: u64,
    number: u64,
    title: String,
    body: Option<String>,
    state: RemoteState,
    #[serde(default)]
    labels: Vec<LabelPayload>,
    #[serde(rename = "type")]
    issue_type: Option<TypePayload>,
    milestone: Option<MilestoneRef>,
    html_url: String,
}

impl From<IssuePayload> for RemoteIssue {
    fn from(p: IssuePayload) -> Self {
        Self {
            id: p.id,
            number: p.number,
            title: p.title,
            body: p.body.unwrap_or_default(),
            state: p.state,
            labels: p.labels.into_iter().map(|l| l.name).collect(),
            issue_type: p.issue_type.map(|t| t.name),
            milestone: p.milestone.map(|m| m.number),
            url: p.html_url,
        }
    }
}

#[derive(Deserialize)]
struct MilestonePayload {
    number: u64,
    title: String,
    description: Option<String>,
    state: RemoteState,
    html_url: String,
}

impl From<MilestonePayload> for RemoteMilestone {
    fn from(p: MilestonePayload) -> Self {
        Self {
            number: p.number,
            title: p.title,
            description: p.description.unwrap_or_default(),
            state: p.state,
            url: p.html_url,
        }
    }
}

// ── Client ────────────────────────────────────────────────────

/// REST client for one repository.
pub struct GithubClient {
    transport: Transport,
    api_base: String,
    web_base: String,
    owner: String,
    repo: String,
}

impl GithubClient {
    /// # Errors
    ///
    /// Returns [`ApiError::Network`] if the HTTP client cannot be built.
    pub fn new(
        api_base: &str,
        owner: &str,
        repo: &str,
        token: &str,
        retry: RetryConfig,
    ) -> std::result::Result<Self, ApiError> {
        let hooks = Arc::new(GithubHooks {
            token: token.trim().to_string(),
        });
        let api_base = api_base.trim_end_matches('/').to_string();
        Ok(Self {
            transport: Transport::new(hooks, retry)?,
            web_base: web_base_for(&api_base),
            api_base,
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.transport = self.transport.with_cancellation(cancel);
        self
    }

    #[must_use]
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}{path}", self.api_base, self.owner, self.repo)
    }

    /// Fetch every page of a list endpoint.
    async fn paginate<T: DeserializeOwned>(
        &self,
        url: &str,
        extra: &[(&str, &str)],
    ) -> std::result::Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let mut request = ApiRequest::get(url)
                .query("per_page", PAGE_SIZE)
                .query("page", page);
            for (key, value) in extra {
                request = request.query(key, value);
            }
            let batch: Vec<T> = self.transport.json(&request).await?;
            let len = batch.len();
            items.extend(batch);
            if len < PAGE_SIZE {
                return Ok(items);
            }
            page += 1;
        }
    }

    /// Confirm the repository is reachable with this token.
    ///
    /// # Errors
    ///
    /// Any transport failure, [`ApiError::NotFound`] when the token cannot see it.
    pub async fn check_repository(&self) -> std::result::Result<(), ApiError> {
        self.transport.send(&ApiRequest::get(self.repo_url(""))).await
    }
}

/// Browser base for an API base: `api.github.com` or `<host>/api/v3`.
fn web_base_for(api_base: &str) -> String {
    if api_base == DEFAULT_GITHUB_API {
        return "https://github.com".to_string();
    }
    api_base.trim_end_matches("/api/v3").to_string()
}

fn is_already_exists(err: &ApiError) -> bool {
    matches!(err, ApiError::Api { status: 422, message } if message.contains("already_exists"))
}

#[async_trait]
impl IssueTracker for GithubClient {
    async fn current_user(&self) -> std::result::Result<String, ApiError> {
        let user: UserPayload = self
            .transport
            .json(&ApiRequest::get(format!("{}/user", self.api_base)))
            .await?;
        Ok(user.login)
    }

    async fn list_labels(&self) -> std::result::Result<Vec<String>, ApiError> {
        let labels: Vec<LabelPayload> = self.paginate(&self.repo_url("/labels"), &[]).await?;
        Ok(labels.into_iter().map(|l| l.name).collect())
    }

    async fn create_label(&self, name: &str) -> std::result::Result<(), ApiError> {
        let request = ApiRequest::post(self.repo_url("/labels"))
            .json(&json!({ "name": name, "color": LABEL_COLOR }))?;
        match self.transport.send(&request).await {
            Err(err) if is_already_exists(&err) => {
                debug!(label = name, "label already exists");
                Ok(())
            }
            other => other,
        }
    }

    async fn get_issue(&self, number: u64) -> std::result::Result<RemoteIssue, ApiError> {
        let payload: IssuePayload = self
            .transport
            .json(&ApiRequest::get(self.repo_url(&format!("/issues/{number}"))))
            .await?;
        Ok(payload.into())
    }

    async fn create_issue(&self, fields: &NewIssue) -> std::result::Result<RemoteIssue, ApiError> {
        let request = ApiRequest::post(self.repo_url("/issues")).json(fields)?;
        let payload: IssuePayload = self.transport.json(&request).await?;
        Ok(payload.into())
    }

    async fn update_issue(
        &self,
        number: u64,
        patch: &UpdatePatch,
    ) -> std::result::Result<RemoteIssue, ApiError> {
        let request = ApiRequest::patch(self.repo_url(&format!("/issues/{number}"))).json(patch)?;
        let payload: IssuePayload = self.transport.json(&request).await?;
        Ok(payload.into())
    }

    async fn get_milestone(&self, number: u64) -> std::result::Result<RemoteMilestone, ApiError> {
        let payload: MilestonePayload = self
            .transport
            .json(&ApiRequest::get(self.repo_url(&format!("/milestones/{number}"))))
            .await?;
        Ok(payload.into())
    }

    async fn list_milestones(&self) -> std::result::Result<Vec<RemoteMilestone>, ApiError> {
        let milestones: Vec<MilestonePayload> = self
            .paginate(&self.repo_url("/milestones"), &[("state", "all")])
            .await?;
        Ok(milestones.into_iter().map(Into::into).collect())
    }

    async fn create_milestone(
        &self,
        fields: &NewMilestone,
    ) -> std::result::Result<RemoteMilestone, ApiError> {
        let request = ApiRequest::post(self.repo_url("/milestones")).json(fields)?;
        let payload: MilestonePayload = self.transport.json(&request).await?;
        Ok(payload.into())
    }

    async fn update_milestone(
        &self,
        number: u64,
        patch: &MilestonePatch,
    ) -> std::result::Result<RemoteMilestone, ApiError> {
        let request =
            ApiRequest::patch(self.repo_url(&format!("/milestones/{number}"))).json(patch)?;
        let payload: MilestonePayload = self.transport.json(&request).await?;
        Ok(payload.into())
    }

    async fn get_parent(&self, number: u64) -> std::result::Result<Option<RemoteIssue>, ApiError> {
        let request = ApiRequest::get(self.repo_url(&format!("/issues/{number}/parent")));
        match self.transport.json::<IssuePayload>(&request).await {
            Ok(payload) => Ok(Some(payload.into())),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn add_sub_issue(
        &self,
        parent_number: u64,
        child_id: u64,
        replace_parent: bool,
    ) -> std::result::Result<(), ApiError> {
        let request = ApiRequest::post(self.repo_url(&format!("/issues/{parent_number}/sub_issues")))
            .json(&json!({ "sub_issue_id": child_id, "replace_parent": replace_parent }))?;
        self.transport.send(&request).await
    }

    async fn remove_sub_issue(
        &self,
        parent_number: u64,
        child_id: u64,
    ) -> std::result::Result<(), ApiError> {
        let request = ApiRequest::delete(self.repo_url(&format!("/issues/{parent_number}/sub_issue")))
            .json(&json!({ "sub_issue_id": child_id }))?;
        self.transport.send(&request).await
    }

    async fn list_blocked_by(&self, number: u64) -> std::result::Result<Vec<RemoteIssue>, ApiError> {
        let url = self.repo_url(&format!("/issues/{number}/dependencies/blocked_by"));
        let issues: Vec<IssuePayload> = self.paginate(&url, &[]).await?;
        Ok(issues.into_iter().map(Into::into).collect())
    }

    async fn add_blocked_by(&self, number: u64, blocker_id: u64) -> std::result::Result<(), ApiError> {
        let request =
            ApiRequest::post(self.repo_url(&format!("/issues/{number}/dependencies/blocked_by")))
                .json(&json!({ "issue_id": blocker_id }))?;
        self.transport.send(&request).await
    }

    async fn remove_blocked_by(
        &self,
        number: u64,
        blocker_id: u64,
    ) -> std::result::Result<(), ApiError> {
        let request = ApiRequest::delete(
            self.repo_url(&format!("/issues/{number}/dependencies/blocked_by/{blocker_id}")),
        );
        self.transport.send(&request).await
    }

    fn issue_url(&self, number: u64) -> String {
        format!("{}/{}/{}/issues/{number}", self.web_base, self.owner, self.repo)
    }

    fn milestone_url(&self, number: u64) -> String {
        format!("{}/{}/{}/milestone/{number}", self.web_base, self.owner, self.repo)
    }
}

// ── Integration ───────────────────────────────────────────────

pub struct GithubIntegration {
    client: Arc<GithubClient>,
    store: Arc<dyn IssueStore>,
    syncer: Syncer,
}

impl GithubIntegration {
    #[must_use]
    pub fn new(
        client: GithubClient,
        store: Arc<dyn IssueStore>,
        settings: SyncerSettings,
        cancel: CancellationToken,
    ) -> Self {
        let client = Arc::new(client);
        let syncer = Syncer::new(client.clone(), store.clone(), SERVICE, settings)
            .with_cancellation(cancel);
        Self {
            client,
            store,
            syncer,
        }
    }

    /// Whether the recorded remote item of `issue` still resolves.
    async fn record_resolves(&self, issue: &LocalIssue) -> Option<(String, bool)> {
        let record = self.syncer.state().get(&issue.id).ok()?;
        let resolved = if issue.issue_type.is_milestone() {
            self.client.get_milestone(record.milestone?).await.map(|_| ())
        } else {
            self.client.get_issue(record.number?).await.map(|_| ())
        };
        Some((issue.id.clone(), resolved.is_ok()))
    }
}

#[async_trait]
impl Integration for GithubIntegration {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn sync(&self, issues: &[LocalIssue], opts: &SyncOptions) -> Result<SyncReport> {
        info!(repo = %self.client.slug(), "pushing to GitHub");
        self.syncer.sync(issues, opts).await
    }

    async fn link(&self, id: &str, remote: &str) -> Result<SyncRecord> {
        let issue = require_local(self.store.as_ref(), id)?;
        let number = parse_number_ref(remote)?;
        let state = self.syncer.state();

        if issue.issue_type.is_milestone() {
            let milestone = self.client.get_milestone(number).await?;
            state.set_milestone(id, milestone.number)?;
        } else {
            let found = self.client.get_issue(number).await?;
            state.set(id, found.number, Some(found.id))?;
        }
        state.set_synced_at(id, Utc::now())?;
        state.flush()?;
        info!(id, number, "linked");
        state.get(id)
    }

    async fn unlink(&self, id: &str) -> Result<()> {
        remove_record(self.store.as_ref(), id, SERVICE)?;
        info!(id, "unlinked");
        Ok(())
    }

    async fn health_check(&self, issues: &[LocalIssue]) -> Result<HealthReport> {
        let mut checks = Vec::new();

        match self.client.current_user().await {
            Ok(login) => checks.push(HealthCheck::pass("credentials", format!("authenticated as {login}"))),
            Err(err) => checks.push(HealthCheck::fail("credentials", err.to_string())),
        }

        match self.client.check_repository().await {
            Ok(()) => checks.push(HealthCheck::pass("repository", self.client.slug())),
            Err(err) => checks.push(HealthCheck::fail("repository", err.to_string())),
        }

        let outcomes: Vec<(String, bool)> = stream::iter(
            issues
                .iter()
                .map(|issue| self.record_resolves(issue).boxed())
                .collect::<Vec<_>>(),
        )
            .buffer_unordered(HEALTH_CONCURRENCY)
            .filter_map(|outcome| async move { outcome })
            .collect()
            .await;
        let mut missing: Vec<String> = outcomes
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(id, _)| id.clone())
            .collect();
        missing.sort();
        checks.push(if missing.is_empty() {
            HealthCheck::pass("records", format!("{} linked issues resolve", outcomes.len()))
        } else {
            HealthCheck::fail(
                "records",
                format!(
                    "{} of {} linked issues do not resolve: {}",
                    missing.len(),
                    outcomes.len(),
                    missing.join(", ")
                ),
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
    use crate::model::IssueType;
    use crate::storage::SqliteStorage;
    use crate::sync::SyncAction;
    use serde_json::Value;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            rate_limit_delay: Duration::ZERO,
        }
    }

    fn client(server: &MockServer) -> GithubClient {
        GithubClient::new(&server.uri(), "acme", "widgets", "ghp_test", fast_retry()).unwrap()
    }

    fn issue_json(number: u64, title: &str) -> Value {
        json!({
            "id": 10_000 + number,
            "number": number,
            "title": title,
            "body": null,
            "state": "open",
            "labels": [{"name": "frontend"}],
            "type": {"id": 1, "name": "Bug"},
            "milestone": {"number": 4, "title": "v1"},
            "html_url": format!("https://github.com/acme/widgets/issues/{number}"),
        })
    }

    #[tokio::test]
    async fn test_requests_carry_github_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header("authorization", "Bearer ghp_test"))
            .and(header("accept", "application/vnd.github+json"))
            .and(header("x-github-api-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "octocat"})))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(client(&server).current_user().await.unwrap(), "octocat");
    }

    #[tokio::test]
    async fn test_get_issue_maps_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/issues/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issue_json(7, "Fix bug")))
            .mount(&server)
            .await;

        let issue = client(&server).get_issue(7).await.unwrap();
        assert_eq!(issue.id, 10_007);
        assert_eq!(issue.body, "");
        assert_eq!(issue.labels, vec!["frontend".to_string()]);
        assert_eq!(issue.issue_type.as_deref(), Some("Bug"));
        assert_eq!(issue.milestone, Some(4));
    }

    #[tokio::test]
    async fn test_missing_issue_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/issues/99"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).get_issue(99).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_sends_only_patch_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/repos/acme/widgets/issues/7"))
            .and(body_json(json!({"state": "closed", "milestone": null})))
            .respond_with(ResponseTemplate::new(200).set_body_json(issue_json(7, "Fix bug")))
            .expect(1)
            .mount(&server)
            .await;

        let patch = UpdatePatch {
            state: Some(RemoteState::Closed),
            milestone: Some(None),
            ..UpdatePatch::default()
        };
        client(&server).update_issue(7, &patch).await.unwrap();
    }

    #[tokio::test]
    async fn test_labels_paginate_until_short_page() {
        let server = MockServer::start().await;
        let full: Vec<Value> = (0..100).map(|i| json!({"name": format!("l{i}")})).collect();
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/labels"))
            .and(query_param("page", "1"))
            .and(query_param("per_page", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(full))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/labels"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"name": "last"}])))
            .mount(&server)
            .await;

        let labels = client(&server).list_labels().await.unwrap();
        assert_eq!(labels.len(), 101);
        assert_eq!(labels.last().map(String::as_str), Some("last"));
    }

    #[tokio::test]
    async fn test_existing_label_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/widgets/labels"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "message": "Validation Failed",
                "errors": [{"resource": "Label", "code": "already_exists", "field": "name"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).create_label("frontend").await.unwrap();
    }

    #[tokio::test]
    async fn test_validation_failure_is_formatted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/widgets/issues"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "message": "Validation Failed",
                "errors": [{"code": "invalid", "field": "type"}]
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .create_issue(&NewIssue {
                title: "x".into(),
                ..NewIssue::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "HTTP 422: Validation Failed (invalid)");
    }

    #[tokio::test]
    async fn test_parent_404_means_no_parent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/issues/7/parent"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert_eq!(client(&server).get_parent(7).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_relationship_routes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/widgets/issues/2/sub_issues"))
            .and(body_json(json!({"sub_issue_id": 10_007, "replace_parent": true})))
            .respond_with(ResponseTemplate::new(201).set_body_json(issue_json(2, "Parent")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/repos/acme/widgets/issues/2/sub_issue"))
            .and(body_json(json!({"sub_issue_id": 10_007})))
            .respond_with(ResponseTemplate::new(200).set_body_json(issue_json(2, "Parent")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/widgets/issues/7/dependencies/blocked_by"))
            .and(body_json(json!({"issue_id": 10_003})))
            .respond_with(ResponseTemplate::new(201).set_body_json(issue_json(7, "Child")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/repos/acme/widgets/issues/7/dependencies/blocked_by/10003"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issue_json(7, "Child")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        client.add_sub_issue(2, 10_007, true).await.unwrap();
        client.remove_sub_issue(2, 10_007).await.unwrap();
        client.add_blocked_by(7, 10_003).await.unwrap();
        client.remove_blocked_by(7, 10_003).await.unwrap();
    }

    #[test]
    fn test_web_urls() {
        let github = GithubClient::new(DEFAULT_GITHUB_API, "acme", "widgets", "t", fast_retry())
            .unwrap();
        assert_eq!(github.issue_url(3), "https://github.com/acme/widgets/issues/3");

        let enterprise = GithubClient::new(
            "https://git.example.com/api/v3/",
            "acme",
            "widgets",
            "t",
            fast_retry(),
        )
        .unwrap();
        assert_eq!(
            enterprise.milestone_url(2),
            "https://git.example.com/acme/widgets/milestone/2"
        );
    }

    async fn mount_fresh_repo(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "octocat"})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/labels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/widgets/labels"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"name": "frontend"})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_push_creates_issue_end_to_end() {
        let server = MockServer::start().await;
        mount_fresh_repo(&server).await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/widgets/issues"))
            .and(body_json(json!({"title": "Fix bug", "body": "", "labels": ["frontend"]})))
            .respond_with(ResponseTemplate::new(201).set_body_json(issue_json(1, "Fix bug")))
            .expect(1)
            .mount(&server)
            .await;

        let storage = Arc::new(SqliteStorage::open_memory().unwrap());
        storage
            .create_issue(&LocalIssue::new("t1", "Fix bug").with_tag("frontend"))
            .unwrap();
        let integration = GithubIntegration::new(
            client(&server),
            storage.clone(),
            SyncerSettings::default(),
            CancellationToken::new(),
        );

        let report = integration
            .sync(&storage.all_issues().unwrap(), &SyncOptions::default())
            .await
            .unwrap();
        let result = report.get("t1").unwrap();
        assert_eq!(result.action, SyncAction::Created);
        assert_eq!(result.url.as_deref(), Some("https://github.com/acme/widgets/issues/1"));

        let stored = storage.get_sync_extension("t1", SERVICE).unwrap().unwrap();
        assert_eq!(stored["number"], 1);
    }

    #[tokio::test]
    async fn test_link_and_unlink() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/issues/12"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issue_json(12, "Existing")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/milestones/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "number": 3, "title": "v1", "description": null, "state": "open",
                "html_url": "https://github.com/acme/widgets/milestone/3"
            })))
            .mount(&server)
            .await;

        let storage = Arc::new(SqliteStorage::open_memory().unwrap());
        storage.create_issue(&LocalIssue::new("t1", "Existing")).unwrap();
        storage
            .create_issue(&LocalIssue::new("m1", "v1").with_type(IssueType::Milestone))
            .unwrap();
        let integration = GithubIntegration::new(
            client(&server),
            storage.clone(),
            SyncerSettings::default(),
            CancellationToken::new(),
        );

        let record = integration
            .link("t1", "https://github.com/acme/widgets/issues/12")
            .await
            .unwrap();
        assert_eq!(record.number, Some(12));
        assert_eq!(record.remote_id, Some(10_012));
        assert!(record.synced_at.is_some());

        let record = integration.link("m1", "#3").await.unwrap();
        assert_eq!(record.milestone, Some(3));

        integration.unlink("t1").await.unwrap();
        assert!(storage.get_sync_extension("t1", SERVICE).unwrap().is_none());
        assert!(integration.unlink("t1").await.is_err());
        assert!(integration.link("nope", "12").await.is_err());
    }

    #[tokio::test]
    async fn test_health_check_flags_missing_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "octocat"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"full_name": "acme/widgets"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/issues/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issue_json(1, "A")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/issues/2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let storage = Arc::new(SqliteStorage::open_memory().unwrap());
        for id in ["a", "b", "c"] {
            storage.create_issue(&LocalIssue::new(id, id)).unwrap();
        }
        let integration = GithubIntegration::new(
            client(&server),
            storage.clone(),
            SyncerSettings::default(),
            CancellationToken::new(),
        );
        let state = integration.syncer.state();
        state.set("a", 1, None).unwrap();
        state.set("b", 2, None).unwrap();
        state.flush().unwrap();

        let report = integration
            .health_check(&storage.all_issues().unwrap())
            .await
            .unwrap();
        assert!(!report.is_healthy());
        let records = report.checks.iter().find(|c| c.name == "records").unwrap();
        assert!(!records.ok);
        assert!(records.detail.contains("1 of 2"));
        assert!(records.detail.contains('b'));
        assert!(report.checks.iter().filter(|c| c.ok).count() == 2);
    }
}
