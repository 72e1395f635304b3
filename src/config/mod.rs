//! Configuration management.
//!
//! This module resolves the hubsync directories and database path, and
//! loads the service configuration.
//!
//! # Layout
//!
//! Everything lives under a single global directory, `~/.hubsync/`:
//! - **Database**: `~/.hubsync/data/hubsync.db`
//! - **Config**: `~/.hubsync/config.json` (see [`HubsyncConfig`])
//!
//! Credentials are never stored on disk; they are read from the
//! environment when an integration is built.

mod settings;

pub use settings::{
    resolve_token, ClickupSettings, GithubSettings, HubsyncConfig, ServiceKind, CONFIG_KEYS,
    DEFAULT_CLICKUP_API, DEFAULT_GITHUB_API,
};

use crate::error::{Error, Result};

use std::path::{Path, PathBuf};

/// Get the global hubsync directory, `~/.hubsync/`.
#[must_use]
pub fn global_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".hubsync"))
}

/// Path of the JSON config file.
pub fn config_path() -> Result<PathBuf> {
    global_dir()
        .map(|dir| dir.join("config.json"))
        .ok_or_else(|| Error::Config("Could not determine home directory".into()))
}

fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Check if test mode is enabled.
///
/// Test mode is enabled by setting `HUBSYNC_TEST_DB=1` (or any truthy value)
/// and redirects the database to an isolated location.
#[must_use]
pub fn is_test_mode() -> bool {
    std::env::var("HUBSYNC_TEST_DB").is_ok_and(|v| is_truthy(&v))
}

/// Returns `~/.hubsync/test/hubsync.db`.
#[must_use]
pub fn test_db_path() -> Option<PathBuf> {
    global_dir().map(|dir| dir.join("test").join("hubsync.db"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. `explicit_path` (the `--db` flag, which clap also fills from `HUBSYNC_DB`)
/// 2. `HUBSYNC_TEST_DB` → test database
/// 3. `HUBSYNC_DB` environment variable
/// 4. `~/.hubsync/data/hubsync.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if is_test_mode() {
        return test_db_path();
    }

    if let Ok(db_path) = std::env::var("HUBSYNC_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_dir().map(|dir| dir.join("data").join("hubsync.db"))
}
