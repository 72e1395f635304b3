//! Service configuration file.
//!
//! Loads and saves `~/.hubsync/config.json`. Values from the file can be
//! overridden per invocation through environment variables; credentials
//! only ever come from the environment.

use crate::error::{Error, Result};
use crate::transport::RetrySettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";
pub const DEFAULT_CLICKUP_API: &str = "https://api.clickup.com";
const DEFAULT_CLICKUP_OPEN: &str = "to do";
const DEFAULT_CLICKUP_CLOSED: &str = "complete";

/// Keys accepted by [`HubsyncConfig::set`].
pub const CONFIG_KEYS: [&str; 13] = [
    "service",
    "github.owner",
    "github.repo",
    "github.api_base",
    "github.assign_self",
    "github.issue_types",
    "clickup.list_id",
    "clickup.api_base",
    "clickup.open_status",
    "clickup.closed_status",
    "retry.max_attempts",
    "retry.base_delay_ms",
    "retry.max_delay_ms",
];

/// Remote service a push targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    #[default]
    Github,
    Clickup,
}

impl ServiceKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Clickup => "clickup",
        }
    }

    /// Environment variables holding the API token, in lookup order.
    #[must_use]
    pub const fn token_vars(&self) -> &'static [&'static str] {
        match self {
            Self::Github => &["GITHUB_TOKEN", "GH_TOKEN"],
            Self::Clickup => &["CLICKUP_TOKEN"],
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "github" | "gh" => Ok(Self::Github),
            "clickup" => Ok(Self::Clickup),
            other => Err(Error::Config(format!(
                "Unknown service '{other}' (expected github or clickup)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    /// Assign created issues to the token's user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assign_self: Option<bool>,
    /// Send GitHub issue types (Bug/Feature/Task).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_types: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickupSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_status: Option<String>,
}

/// Contents of `~/.hubsync/config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubsyncConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceKind>,
    #[serde(default)]
    pub github: GithubSettings,
    #[serde(default)]
    pub clickup: ClickupSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl HubsyncConfig {
    /// Load from the global config path. A missing file yields defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&super::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&super::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {e}")))
    }

    /// File config with process environment overrides applied.
    pub fn effective() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Recognized: `HUBSYNC_SERVICE`, `HUBSYNC_GITHUB_REPO` (`owner/repo`),
    /// `GITHUB_API_URL`, `CLICKUP_LIST_ID`, `CLICKUP_API_URL`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(service) = get("HUBSYNC_SERVICE") {
            self.service = Some(service.parse()?);
        }
        if let Some(slug) = get("HUBSYNC_GITHUB_REPO") {
            let (owner, repo) = split_repo_slug(&slug)?;
            self.github.owner = Some(owner);
            self.github.repo = Some(repo);
        }
        if let Some(url) = get("GITHUB_API_URL") {
            self.github.api_base = Some(url);
        }
        if let Some(list) = get("CLICKUP_LIST_ID") {
            self.clickup.list_id = Some(list);
        }
        if let Some(url) = get("CLICKUP_API_URL") {
            self.clickup.api_base = Some(url);
        }
        Ok(())
    }

    /// Merge one `key = value` pair into the config.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "service" => self.service = Some(value.parse()?),
            "github.owner" => self.github.owner = Some(value.to_string()),
            "github.repo" => {
                if value.contains('/') {
                    let (owner, repo) = split_repo_slug(value)?;
                    self.github.owner = Some(owner);
                    self.github.repo = Some(repo);
                } else {
                    self.github.repo = Some(value.to_string());
                }
            }
            "github.api_base" => self.github.api_base = Some(value.to_string()),
            "github.assign_self" => self.github.assign_self = Some(parse_bool(key, value)?),
            "github.issue_types" => self.github.issue_types = Some(parse_bool(key, value)?),
            "clickup.list_id" => self.clickup.list_id = Some(value.to_string()),
            "clickup.api_base" => self.clickup.api_base = Some(value.to_string()),
            "clickup.open_status" => self.clickup.open_status = Some(value.to_string()),
            "clickup.closed_status" => self.clickup.closed_status = Some(value.to_string()),
            "retry.max_attempts" => self.retry.max_attempts = Some(parse_number(key, value)?),
            "retry.base_delay_ms" => self.retry.base_delay_ms = Some(parse_number(key, value)?),
            "retry.max_delay_ms" => self.retry.max_delay_ms = Some(parse_number(key, value)?),
            _ => {
                return Err(Error::Config(format!(
                    "Unknown config key '{key}'. Valid keys: {}",
                    CONFIG_KEYS.join(", ")
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn service(&self) -> ServiceKind {
        self.service.unwrap_or_default()
    }

    /// `(owner, repo)` of the GitHub target.
    pub fn github_repo(&self) -> Result<(String, String)> {
        match (&self.github.owner, &self.github.repo) {
            (Some(owner), Some(repo)) => Ok((owner.clone(), repo.clone())),
            _ => Err(Error::Config(
                "GitHub repository not configured: run `hubsync config set github.repo owner/name` \
                 or set HUBSYNC_GITHUB_REPO"
                    .into(),
            )),
        }
    }

    #[must_use]
    pub fn github_api_base(&self) -> &str {
        self.github.api_base.as_deref().unwrap_or(DEFAULT_GITHUB_API)
    }

    pub fn clickup_list(&self) -> Result<&str> {
        self.clickup.list_id.as_deref().ok_or_else(|| {
            Error::Config(
                "ClickUp list not configured: run `hubsync config set clickup.list_id <id>` \
                 or set CLICKUP_LIST_ID"
                    .into(),
            )
        })
    }

    #[must_use]
    pub fn clickup_api_base(&self) -> &str {
        self.clickup.api_base.as_deref().unwrap_or(DEFAULT_CLICKUP_API)
    }

    #[must_use]
    pub fn clickup_open_status(&self) -> &str {
        self.clickup.open_status.as_deref().unwrap_or(DEFAULT_CLICKUP_OPEN)
    }

    #[must_use]
    pub fn clickup_closed_status(&self) -> &str {
        self.clickup
            .closed_status
            .as_deref()
            .unwrap_or(DEFAULT_CLICKUP_CLOSED)
    }
}

/// Read the API token for `service` through `lookup`.
pub fn resolve_token(service: ServiceKind, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    service
        .token_vars()
        .iter()
        .find_map(|var| lookup(var).filter(|v| !v.trim().is_empty()))
        .ok_or_else(|| Error::MissingCredential {
            service: service.to_string(),
            var: service.token_vars()[0].to_string(),
        })
}

fn split_repo_slug(slug: &str) -> Result<(String, String)> {
    match slug.trim().split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(Error::Config(format!(
            "Invalid repository '{slug}' (expected owner/repo)"
        ))),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{key} expects true or false, got '{value}'"))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{key} expects a number, got '{value}'")))
}
