//! Remote service integrations.
//!
//! Each service implements [`Integration`], the surface the CLI drives:
//! push a set of issues, link or unlink a single issue by hand, and check
//! that credentials and recorded identifiers still work.
//!
//! - [`github`]: issues, labels, milestones, sub-issues and issue dependencies
//! - [`clickup`]: tasks in one list, with parent tasks and task dependencies

pub mod clickup;
pub mod github;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use crate::config::{resolve_token, HubsyncConfig, ServiceKind};
use crate::error::{Error, Result};
use crate::model::LocalIssue;
use crate::storage::IssueStore;
use crate::sync::{SyncOptions, SyncRecord, SyncReport};
use crate::transport::RetryConfig;

pub use clickup::{ClickupClient, ClickupIntegration};
pub use github::{GithubClient, GithubIntegration};

/// Records resolved concurrently during a health check.
pub const HEALTH_CONCURRENCY: usize = 5;

/// One named health check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl HealthCheck {
    #[must_use]
    pub fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok: true,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub service: String,
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }
}

/// A configured remote service.
#[async_trait]
pub trait Integration: Send + Sync {
    /// Service name, also the sync-extension key in the local store.
    fn name(&self) -> &'static str;

    /// Push `issues` to the remote.
    async fn sync(&self, issues: &[LocalIssue], opts: &SyncOptions) -> Result<SyncReport>;

    /// Record an existing remote item as the counterpart of local issue `id`.
    async fn link(&self, id: &str, remote: &str) -> Result<SyncRecord>;

    /// Forget the remote counterpart of `id`. The remote item is untouched.
    async fn unlink(&self, id: &str) -> Result<()>;

    async fn health_check(&self, issues: &[LocalIssue]) -> Result<HealthReport>;
}

/// Build the integration selected by `config`.
///
/// The API token is read from the environment.
///
/// # Errors
///
/// Returns [`Error::MissingCredential`] without a token and
/// [`Error::Config`] when the target repository or list is not configured.
pub fn create_integration(
    config: &HubsyncConfig,
    store: Arc<dyn IssueStore>,
    cancel: CancellationToken,
) -> Result<Box<dyn Integration>> {
    let service = config.service();
    let token = resolve_token(service, |name| std::env::var(name).ok())?;
    let retry = RetryConfig::from(&config.retry);

    match service {
        ServiceKind::Github => {
            let (owner, repo) = config.github_repo()?;
            let client = GithubClient::new(config.github_api_base(), &owner, &repo, &token, retry)?
                .with_cancellation(cancel.clone());
            let settings = crate::sync::SyncerSettings {
                assign_self: config.github.assign_self.unwrap_or(false),
                map_issue_types: config.github.issue_types.unwrap_or(false),
            };
            Ok(Box::new(GithubIntegration::new(client, store, settings, cancel)))
        }
        ServiceKind::Clickup => {
            let client = ClickupClient::new(
                config.clickup_api_base(),
                config.clickup_list()?,
                &token,
                retry,
            )?
            .with_cancellation(cancel.clone())
            .with_statuses(config.clickup_open_status(), config.clickup_closed_status());
            Ok(Box::new(ClickupIntegration::new(client, store, cancel)))
        }
    }
}

/// Wait derived from an `X-RateLimit-Reset` header (epoch seconds).
pub(crate) fn rate_limit_reset_wait(headers: &HeaderMap) -> Option<Duration> {
    let reset: u64 = headers
        .get("x-ratelimit-reset")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
    Some(Duration::from_secs(reset.saturating_sub(now)))
}

/// Parse a numeric remote reference: `12`, `#12`, or a URL ending in the number.
pub(crate) fn parse_number_ref(remote: &str) -> Result<u64> {
    let trimmed = remote.trim().trim_end_matches('/');
    let tail = trimmed.rsplit('/').next().unwrap_or(trimmed);
    tail.trim_start_matches('#')
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("Not a remote issue reference: '{remote}'")))
}

/// Fail with [`Error::IssueNotFound`] unless `id` exists locally.
pub(crate) fn require_local(store: &dyn IssueStore, id: &str) -> Result<LocalIssue> {
    store.get(id)?.ok_or_else(|| Error::IssueNotFound { id: id.to_string() })
}

/// Remove the sync record of `id` for `service`.
pub(crate) fn remove_record(store: &dyn IssueStore, id: &str, service: &str) -> Result<()> {
    require_local(store, id)?;
    if store.sync_data(id, service)?.is_none() {
        return Err(Error::NotLinked {
            id: id.to_string(),
            service: service.to_string(),
        });
    }
    store.remove_sync_data(id, service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_number_ref_forms() {
        assert_eq!(parse_number_ref("12").unwrap(), 12);
        assert_eq!(parse_number_ref("#12").unwrap(), 12);
        assert_eq!(
            parse_number_ref("https://github.com/acme/widgets/issues/12").unwrap(),
            12
        );
        assert_eq!(
            parse_number_ref("https://github.com/acme/widgets/milestone/3/").unwrap(),
            3
        );
        assert!(parse_number_ref("twelve").is_err());
    }

    #[test]
    fn test_reset_header_in_the_past_waits_zero() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("1000"));
        assert_eq!(rate_limit_reset_wait(&headers), Some(Duration::ZERO));
        assert_eq!(rate_limit_reset_wait(&HeaderMap::new()), None);
    }

    #[test]
    fn test_health_report_requires_every_check() {
        let mut report = HealthReport {
            service: "github".into(),
            checks: vec![HealthCheck::pass("credentials", "ok")],
        };
        assert!(report.is_healthy());
        report.checks.push(HealthCheck::fail("records", "1 missing"));
        assert!(!report.is_healthy());
    }
}
