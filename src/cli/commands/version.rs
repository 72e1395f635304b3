//! `hubsync version`: build info plus the remote a push would target.

use crate::config::{HubsyncConfig, ServiceKind};
use crate::error::Result;
use crate::integrations::github::API_VERSION as GITHUB_API_VERSION;
use crate::storage::schema::CURRENT_SCHEMA_VERSION;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Serialize)]
struct VersionOutput<'a> {
    version: &'static str,
    build: &'static str,
    schema: i32,
    service: ServiceKind,
    api_base: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_version: Option<&'static str>,
}

fn describe(config: &HubsyncConfig) -> VersionOutput<'_> {
    let service = config.service();
    let (api_base, api_version) = match service {
        ServiceKind::Github => (config.github_api_base(), Some(GITHUB_API_VERSION)),
        ServiceKind::Clickup => (config.clickup_api_base(), None),
    };
    VersionOutput {
        version: env!("CARGO_PKG_VERSION"),
        build: if cfg!(debug_assertions) { "dev" } else { "release" },
        schema: CURRENT_SCHEMA_VERSION,
        service,
        api_base,
        api_version,
    }
}

/// Print version info. A broken config file degrades to defaults here.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(json: bool) -> Result<()> {
    let config = HubsyncConfig::effective().unwrap_or_else(|err| {
        warn!(error = %err, "ignoring unreadable config");
        HubsyncConfig::default()
    });
    let info = describe(&config);

    if json {
        println!("{}", serde_json::to_string(&info)?);
        return Ok(());
    }

    println!("hubsync {} ({}, schema v{})", info.version, info.build, info.schema);
    match info.api_version {
        Some(api_version) => println!("target: {} at {} (API {api_version})", info.service, info.api_base),
        None => println!("target: {} at {}", info.service, info.api_base),
    }
    Ok(())
}
