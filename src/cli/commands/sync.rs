//! Sync command implementations.
//!
//! `push`, `link`, `unlink` and `check` drive the configured
//! [`Integration`]; `status` only reads the local store.

use crate::cli::commands::issue::describe_record;
use crate::cli::commands::open_storage;
use crate::cli::{SyncCommands, SyncPushArgs};
use crate::config::HubsyncConfig;
use crate::error::{Error, Result};
use crate::integrations::{create_integration, HealthReport, Integration};
use crate::model::LocalIssue;
use crate::storage::{IssueStore, SqliteStorage};
use crate::sync::{is_stale, Progress, SyncAction, SyncOptions, SyncRecord, SyncReport};
use colored::Colorize;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Execute sync commands.
pub fn execute(command: &SyncCommands, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;

    if let SyncCommands::Status = command {
        return status(&storage, json);
    }

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| Error::Other(format!("Failed to create async runtime: {e}")))?;

    rt.block_on(execute_async(command, Arc::new(storage), json))
}

async fn execute_async(command: &SyncCommands, storage: Arc<SqliteStorage>, json: bool) -> Result<()> {
    let config = HubsyncConfig::effective()?;
    let cancel = CancellationToken::new();
    let store: Arc<dyn IssueStore> = storage.clone();
    let integration = create_integration(&config, store, cancel.clone())?;

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, finishing in-flight requests");
                cancel.cancel();
            }
        }
    });

    match command {
        SyncCommands::Push(args) => push(integration.as_ref(), &storage, args, json).await,
        SyncCommands::Link { id, remote } => link(integration.as_ref(), id, remote, json).await,
        SyncCommands::Unlink { id } => unlink(integration.as_ref(), id, json).await,
        SyncCommands::Check => check(integration.as_ref(), &storage, json).await,
        SyncCommands::Status => status(&storage, json),
    }
}

/// Issues named on the command line, or every issue when none are.
fn select_issues(storage: &SqliteStorage, ids: &[String]) -> Result<Vec<LocalIssue>> {
    if ids.is_empty() {
        return storage.all_issues();
    }
    ids.iter().map(|id| storage.require_issue(id)).collect()
}

async fn push(
    integration: &dyn Integration,
    storage: &SqliteStorage,
    args: &SyncPushArgs,
    json: bool,
) -> Result<()> {
    let issues = select_issues(storage, &args.ids)?;

    let show_progress = !json && std::io::stderr().is_terminal();
    let opts = SyncOptions {
        dry_run: args.dry_run,
        force: args.force,
        disable_relationships: args.no_relationships,
        progress: show_progress.then(|| {
            Arc::new(|p: &Progress| {
                let mut err = std::io::stderr();
                let _ = write!(err, "\r  [{}/{}] {} {}\x1b[K", p.completed, p.total, p.action, p.id);
                let _ = err.flush();
            }) as crate::sync::ProgressFn
        }),
    };

    let report = integration.sync(&issues, &opts).await?;
    if show_progress {
        eprint!("\r\x1b[K");
    }

    if json {
        let output = serde_json::json!({
            "service": integration.name(),
            "dry_run": args.dry_run,
            "results": &report.results,
            "warnings": &report.warnings,
            "counts": report
                .counts()
                .into_iter()
                .map(|(action, n)| (action.to_string(), serde_json::Value::from(n)))
                .collect::<serde_json::Map<_, _>>(),
        });
        println!("{output}");
    } else {
        print_report(&report, integration.name(), args.dry_run);
    }

    if args.strict && report.has_failures() {
        return Err(Error::SyncIncomplete {
            failed: report.failed(),
            total: report.results.len(),
        });
    }
    Ok(())
}

fn print_report(report: &SyncReport, service: &str, dry_run: bool) {
    if report.results.is_empty() {
        println!("No issues to sync.");
        return;
    }

    let heading = if dry_run {
        format!("Dry run against {service}")
    } else {
        format!("Pushed to {service}")
    };
    println!("{}", heading.bold());
    println!();

    for result in &report.results {
        let action = format!("{:<12}", result.action.as_str());
        let action = match result.action {
            SyncAction::Created | SyncAction::Updated => action.green(),
            SyncAction::WouldCreate | SyncAction::WouldUpdate => action.cyan(),
            SyncAction::Unchanged | SyncAction::Skipped => action.dimmed(),
            SyncAction::Error => action.red(),
        };
        let target = match (result.number, &result.key) {
            (Some(n), _) => format!("#{n}"),
            (None, Some(key)) => key.clone(),
            (None, None) => String::new(),
        };
        println!("  {action} {:<14} {target}", result.id);
        if let Some(error) = &result.error {
            println!("               {}", error.red());
        }
    }

    if !report.warnings.is_empty() {
        println!();
        println!("{}", "Warnings".yellow().bold());
        for warning in &report.warnings {
            println!("  {warning}");
        }
    }

    println!();
    let summary: Vec<String> = report
        .counts()
        .into_iter()
        .map(|(action, n)| format!("{n} {action}"))
        .collect();
    println!("Total: {} ({})", report.results.len(), summary.join(", "));
}

async fn link(integration: &dyn Integration, id: &str, remote: &str, json: bool) -> Result<()> {
    let record = integration.link(id, remote).await?;

    if json {
        let output = serde_json::json!({
            "id": id,
            "service": integration.name(),
            "record": serde_json::Value::Object(record.to_data()),
        });
        println!("{output}");
    } else {
        println!("Linked {id} to {} {}", integration.name(), describe_record(&record));
    }
    Ok(())
}

async fn unlink(integration: &dyn Integration, id: &str, json: bool) -> Result<()> {
    integration.unlink(id).await?;

    if json {
        let output = serde_json::json!({
            "id": id,
            "service": integration.name(),
            "unlinked": true,
        });
        println!("{output}");
    } else {
        println!("Unlinked {id} from {}", integration.name());
    }
    Ok(())
}

async fn check(integration: &dyn Integration, storage: &SqliteStorage, json: bool) -> Result<()> {
    let issues = storage.all_issues()?;
    let report = integration.health_check(&issues).await?;

    if json {
        let output = serde_json::json!({
            "healthy": report.is_healthy(),
            "report": &report,
        });
        println!("{output}");
    } else {
        print_health(&report);
    }

    if report.is_healthy() {
        Ok(())
    } else {
        let failed = report.checks.iter().filter(|c| !c.ok).count();
        Err(Error::Other(format!(
            "{failed} {} health check(s) failed",
            report.service
        )))
    }
}

fn print_health(report: &HealthReport) {
    println!("{}", format!("{} health check", report.service).bold());
    for check in &report.checks {
        let mark = if check.ok { "✓".green() } else { "✗".red() };
        println!("  {mark} {:<12} {}", check.name, check.detail);
    }
}

fn status(storage: &SqliteStorage, json: bool) -> Result<()> {
    let config = HubsyncConfig::effective()?;
    let service = config.service();
    let issues = storage.all_issues()?;
    let records = storage.sync_extensions_for(service.as_str())?;

    let rows: Vec<(&LocalIssue, SyncRecord)> = issues
        .iter()
        .map(|issue| {
            let record = records.get(&issue.id).map(SyncRecord::from_data).unwrap_or_default();
            (issue, record)
        })
        .collect();

    if json {
        let entries: Vec<serde_json::Value> = rows
            .iter()
            .map(|(issue, record)| {
                serde_json::json!({
                    "id": issue.id,
                    "title": issue.title,
                    "linked": !record.is_empty(),
                    "stale": is_stale(issue.updated_at, record.synced_at),
                    "record": serde_json::Value::Object(record.to_data()),
                })
            })
            .collect();
        let output = serde_json::json!({
            "service": service.as_str(),
            "issues": entries,
            "count": rows.len(),
        });
        println!("{output}");
        return Ok(());
    }

    if rows.is_empty() {
        println!("No issues found.");
        return Ok(());
    }

    println!("Sync status ({service}):");
    println!();
    for (issue, record) in &rows {
        let marker = if record.is_empty() {
            "new".cyan()
        } else if is_stale(issue.updated_at, record.synced_at) {
            "stale".yellow()
        } else {
            "synced".green()
        };
        println!("  {marker:<8} [{}] {}", issue.id, issue.title);
        if !record.is_empty() {
            println!("           {}", describe_record(record));
        }
    }
    Ok(())
}
